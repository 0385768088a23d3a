//! Error types for pool lifecycle operations.

use std::time::Duration;

use oneoff_core::CoreError;
use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced by the worker pool lifecycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Underlying store or domain failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// `start` was called on a pool that is already running.
    #[error("worker pool already started")]
    AlreadyStarted,

    /// Workers did not drain within the shutdown deadline.
    ///
    /// Executors are not hard-killed; they keep running until their own
    /// cancellation observation.
    #[error("worker pool shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },
}
