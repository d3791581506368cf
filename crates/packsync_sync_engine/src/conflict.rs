//! Conflict detection and resolution.
//!
//! A conflict exists when a remote snapshot differs from the in-memory
//! set. Sets are compared by their canonical form (records sorted by id),
//! so the outcome does not depend on array order or on which side arrived
//! first.

use packsync_model::{canonical_key, Record};
use std::fmt;
use std::str::FromStr;

/// How remote deltas that differ from the in-memory set are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Keep the in-memory set and flag that remote changes exist.
    #[default]
    Local,
    /// Replace the in-memory set with the remote one.
    Remote,
    /// Keep the in-memory set and hold both sets for the caller to decide.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves without user intervention.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Returns the policy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Local => "local",
            ConflictPolicy::Remote => "remote",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ConflictPolicy::Local),
            "remote" => Ok(ConflictPolicy::Remote),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// The two competing sets of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSnapshot {
    /// The in-memory set when the delta arrived.
    pub local: Vec<Record>,
    /// The incoming remote set.
    pub remote: Vec<Record>,
}

/// Result of applying a policy to a remote delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// Both sets are equal; nothing to do.
    InSync,
    /// The local set was kept and remote changes remain pending.
    KeptLocal,
    /// The remote set replaces the local one.
    AcceptedRemote(Vec<Record>),
    /// Both sets are held until the caller resolves.
    Deferred(ConflictSnapshot),
}

impl ConflictOutcome {
    /// Returns true if the sets differed.
    pub fn is_conflict(&self) -> bool {
        !matches!(self, ConflictOutcome::InSync)
    }

    /// Returns true if remote changes remain unapplied after this outcome.
    pub fn leaves_remote_changes(&self) -> bool {
        matches!(
            self,
            ConflictOutcome::KeptLocal | ConflictOutcome::Deferred(_)
        )
    }
}

/// How a deferred conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Push the in-memory set to the remote.
    KeepLocal,
    /// Replace the in-memory set with the remote one.
    AcceptRemote,
}

/// Applies a [`ConflictPolicy`] to incoming remote sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Creates a resolver with the given policy.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Returns the active policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Returns true if the two sets differ.
    pub fn is_conflict(local: &[Record], remote: &[Record]) -> bool {
        canonical_key(local) != canonical_key(remote)
    }

    /// Decides what to do with `remote` given the current `local` set.
    pub fn resolve(&self, local: &[Record], remote: &[Record]) -> ConflictOutcome {
        if !Self::is_conflict(local, remote) {
            return ConflictOutcome::InSync;
        }

        tracing::debug!(
            policy = %self.policy,
            local = local.len(),
            remote = remote.len(),
            "remote delta differs from local set"
        );

        match self.policy {
            ConflictPolicy::Local => ConflictOutcome::KeptLocal,
            ConflictPolicy::Remote => ConflictOutcome::AcceptedRemote(remote.to_vec()),
            ConflictPolicy::Manual => ConflictOutcome::Deferred(ConflictSnapshot {
                local: local.to_vec(),
                remote: remote.to_vec(),
            }),
        }
    }
}
