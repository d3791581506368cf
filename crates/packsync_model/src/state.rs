//! Sync status and mode.

use chrono::{DateTime, Utc};
use std::fmt;

/// Progress of cloud operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Not bound to remote storage. Pinned while in local-only mode.
    #[default]
    Offline,
    /// A cloud read or write is in flight.
    Syncing,
    /// The last cloud operation succeeded.
    Synced,
    /// The last cloud operation failed.
    Error,
}

impl SyncStatus {
    /// Returns true if a cloud operation is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Observable synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncState {
    /// Current status.
    pub status: SyncStatus,
    /// Remote write time of the last confirmed baseline.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Local-only writes not yet mirrored to remote storage.
    pub has_local_changes: bool,
    /// A remote delta was detected but not applied locally.
    pub has_remote_changes: bool,
}

/// Whether the engine mirrors to remote storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Local storage only.
    #[default]
    LocalOnly,
    /// Local storage mirrored to remote storage.
    CloudActive,
}

impl SyncMode {
    /// Returns true in cloud mode.
    pub fn is_cloud(&self) -> bool {
        matches!(self, SyncMode::CloudActive)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::LocalOnly => f.write_str("local"),
            SyncMode::CloudActive => f.write_str("cloud"),
        }
    }
}
