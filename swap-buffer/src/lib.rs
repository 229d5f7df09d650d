//! Double-buffer swap engine.
//!
//! [`SwapController`] owns two [`WindowBuffer`]s that exchange fill/drain
//! roles exactly once per window, under a single lock shared by the
//! ingestion and processing paths. The crate is generic over the item type
//! and knows nothing about transports or serialization; callers compose
//! cancellation around [`SwapController::wait_for_swap`] themselves.

mod buffer;
mod controller;
mod error;

pub use buffer::WindowBuffer;
pub use controller::{SwapController, SwapSignal};
pub use error::{Result, SwapError};
