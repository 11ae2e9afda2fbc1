use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A referenced row does not exist.
    #[error("{entity} `{key}` not found")]
    NotFound { entity: &'static str, key: String },
    /// A uniqueness constraint rejected the write.
    #[error("{entity} `{key}` already exists")]
    Conflict { entity: &'static str, key: String },
    /// A persisted row could not be mapped back into its model.
    #[error("invalid {entity} row: {message}")]
    InvalidRow {
        entity: &'static str,
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        StorageError::Conflict {
            entity,
            key: key.to_string(),
        }
    }
}
