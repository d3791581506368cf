//! Configuration for the sync engine.

use crate::conflict::ConflictPolicy;

/// Which side wins when cloud mode loads and both sides hold records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPrecedence {
    /// A non-empty remote set always replaces the local one.
    #[default]
    Remote,
    /// Unsynced local edits are pushed instead of being replaced.
    LocalWhenDirty,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Policy applied to remote deltas that differ from the in-memory set.
    pub conflict_policy: ConflictPolicy,
    /// Precedence applied by cloud-mode loads.
    pub load_precedence: LoadPrecedence,
    /// Whether cloud mode opens a real-time change feed.
    pub realtime: bool,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            load_precedence: LoadPrecedence::default(),
            realtime: true,
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the load precedence.
    pub fn with_load_precedence(mut self, precedence: LoadPrecedence) -> Self {
        self.load_precedence = precedence;
        self
    }

    /// Enables or disables the real-time change feed.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
