//! Error taxonomy shared across the scheduler core.
//!
//! Storage, service, and engine code all surface `CoreError`. The variants
//! deliberately mirror what callers can act on: absent rows, rejected state
//! transitions, bad input, and persistence failures.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for scheduler operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation rejected because the entity is in the wrong state.
    ///
    /// Example: updating a job that is no longer `scheduled`. The message
    /// names the offending state so API layers can report it verbatim.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input failed validation before touching the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Executor rejected its configuration or failed to resolve.
    #[error("executor error: {0}")]
    Executor(String),

    /// Persistence failure. The in-flight operation is abandoned.
    #[error("database error: {0}")]
    Database(String),
}

impl CoreError {
    /// Creates a not-found error naming the missing entity.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates an invalid-state error with the refusal reason.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn display_includes_reason() {
        let err = CoreError::invalid_state("cannot update job in status: running");
        assert_eq!(err.to_string(), "invalid state: cannot update job in status: running");
    }
}
