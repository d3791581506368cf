//! Error types for the sync engine.

use packsync_model::CodecError;
use packsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for identity provider calls.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Identity failures. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No authenticated identity.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A sign-in or sign-out is still in flight.
    #[error("identity is loading")]
    Loading,

    /// The provider reported a failure.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The operation needs an authenticated, settled identity.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Local storage failed. The in-memory set is left untouched.
    #[error("local storage error: {0}")]
    Storage(#[source] StorageError),

    /// Remote storage failed. Local data is left intact.
    #[error("remote storage error: {0}")]
    Remote(#[source] StorageError),

    /// An import payload is not a JSON array of records.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] CodecError),

    /// The remote change feed could not be opened or broke.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The operation only exists in cloud mode.
    #[error("operation requires cloud mode")]
    CloudModeRequired,

    /// `initialize` has not been called.
    #[error("engine not initialized")]
    NotInitialized,

    /// There is no deferred conflict to resolve.
    #[error("no pending conflict")]
    NoPendingConflict,
}

impl SyncError {
    /// Wraps a local storage failure.
    pub fn local(error: StorageError) -> Self {
        Self::Storage(error)
    }

    /// Wraps a remote storage failure.
    pub fn remote(error: StorageError) -> Self {
        Self::Remote(error)
    }

    /// Returns true if an explicit retry (save, load or sync) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Remote(_) | SyncError::Subscription(_))
    }
}
