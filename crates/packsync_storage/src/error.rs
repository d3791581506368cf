//! Error types for storage operations.

use packsync_model::CodecError;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored or supplied data could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No identity is bound to the remote store.
    #[error("no identity bound to remote store")]
    Unauthenticated,

    /// The remote store could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote store refused the operation for this identity.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend rejected the write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Rejected(_) | StorageError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StorageError::Unavailable("offline".into()).is_retryable());
        assert!(StorageError::Rejected("quota".into()).is_retryable());
        assert!(!StorageError::Unauthenticated.is_retryable());
        assert!(!StorageError::PermissionDenied("rules".into()).is_retryable());
    }

    #[test]
    fn codec_errors_convert() {
        let err: StorageError = CodecError::invalid_json("eof").into();
        assert!(matches!(err, StorageError::Codec(_)));
        assert!(err.to_string().contains("eof"));
    }
}
