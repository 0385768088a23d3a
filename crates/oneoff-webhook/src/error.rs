//! Error types for webhook delivery.

use std::time::Duration;

use oneoff_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors surfaced by the delivery pipeline.
///
/// Transport-level failures land on the delivery row as retry candidates;
/// the distinction here only matters for logging and the error text.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection-level failure before any response arrived.
    #[error("request failed: {0}")]
    Network(String),

    /// The HTTP client gave up waiting.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The HTTP client could not be constructed.
    #[error("invalid delivery client configuration: {0}")]
    Configuration(String),

    /// Store failure while recording the attempt.
    #[error(transparent)]
    Core(#[from] CoreError),
}
