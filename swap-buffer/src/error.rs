use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwapError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwapError {
    /// Append attempted after the stream finished. Indicates a lifecycle
    /// ordering bug in the caller.
    #[error("append rejected: stream already finished")]
    Closed,
    /// A drain was attempted against a generation that is no longer
    /// current. Indicates a double release or a stale wakeup and must be
    /// treated as fatal.
    #[error("stale window generation: current {current}, requested {requested}")]
    StaleGeneration { current: u64, requested: u64 },
}
