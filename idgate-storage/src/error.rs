//! Storage error types.

use idgate_core::ApiError;
use thiserror::Error;

/// Errors raised by key-value backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key contains characters the backend cannot store.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The backend cannot be used at all.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::StorageUnavailable(err.to_string())
    }
}
