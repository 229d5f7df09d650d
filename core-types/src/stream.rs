use async_trait::async_trait;
use thiserror::Error;

use crate::types::Sample;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// External producer of ordered sample batches.
///
/// Guarantees: batches arrive in the order produced and no batch is
/// delivered twice. `Ok(None)` signals end-of-stream; no further calls are
/// made after it.
#[async_trait]
pub trait BatchSource: Send + 'static {
    async fn next_batch(&mut self) -> Result<Option<Vec<Sample>>, SourceError>;
}

/// External consumer of one fully drained window at a time.
///
/// Implementations must not retain references to `samples` past the call;
/// the backing buffer is recycled as soon as the window is released.
#[async_trait]
pub trait WindowSink: Send + 'static {
    async fn process(&mut self, samples: &[Sample]) -> Result<(), BoxError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// A batch failed to parse. Recoverable: the batch is dropped and the
    /// stream continues.
    #[error("malformed batch: {detail}")]
    Malformed { detail: String },
    /// The transport closed without an end-of-stream marker. Treated as a
    /// forced end-of-stream.
    #[error("source disconnected: {detail}")]
    Disconnected { detail: String },
    /// Unrecoverable transport failure.
    #[error("source transport error: {source}")]
    Transport {
        #[source]
        source: BoxError,
    },
}
