//! Queue error types.

use thiserror::Error;

/// Errors from queue operations and background processors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("queue is full")]
    QueueFull,

    /// No queue registered under this name.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// `start()` was called on a processor that is already running.
    #[error("processor is already running")]
    ProcessorAlreadyRunning,

    /// `stop()` was called on a processor that is not running.
    #[error("processor is not running")]
    ProcessorNotRunning,

    /// A message handler failed.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Convenience alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
