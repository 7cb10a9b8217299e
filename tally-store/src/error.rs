//! Error types for the storage layer.

use tally_types::ApiError;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row could not be interpreted.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::IntegrityConflict(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
