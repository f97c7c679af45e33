use crate::record::UserId;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("url id has been deleted: {0}")]
    Deleted(String),
    #[error("url '{url}' is already shortened (url id '{url_id}', requested by user {user_id})")]
    UniqueViolation {
        url: String,
        url_id: String,
        user_id: UserId,
    },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("corrupted log entry at line {line}: {reason}")]
    Corruption { line: usize, reason: String },
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    pub fn unique_violation(url: impl Into<String>, url_id: impl Into<String>, user_id: UserId) -> Self {
        Self::UniqueViolation {
            url: url.into(),
            url_id: url_id.into(),
            user_id,
        }
    }

    /// Returns `true` for conditions that describe the data rather than a
    /// failing backend (missing, deleted or duplicated links).
    pub fn is_data_condition(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Deleted(_) | Self::UniqueViolation { .. }
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
