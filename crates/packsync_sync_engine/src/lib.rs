//! # packsync sync engine
//!
//! Local-first sync engine for a single checklist record set.
//!
//! This crate provides:
//! - Mode state machine (local only ↔ cloud active)
//! - Dual-write saves and remote-authoritative loads
//! - Conflict detection with local, remote and manual policies
//! - Real-time remote change subscription
//! - Identity provider abstraction
//!
//! ## Architecture
//!
//! The engine keeps one authoritative in-memory set and mirrors it to a
//! [`packsync_storage::LocalStore`] always and to a
//! [`packsync_storage::RemoteStore`] while in cloud mode:
//! 1. Local mode never touches the network
//! 2. Entering cloud mode loads the remote set, or seeds it from local
//! 3. Remote deltas go through the [`ConflictResolver`] before they reach memory
//!
//! ## Key Invariants
//!
//! - Status is `Offline` whenever the mode is local
//! - At most one remote subscription is open, and only in cloud mode
//! - The remote is bound to an identity only by mode transitions
//! - Cloud mode is entered only by an explicit request, never on identity
//!   detection alone
//! - Cleanup runs once and releases every listener

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod identity;
mod observer;
mod subscription;

pub use config::{LoadPrecedence, SyncConfig};
pub use conflict::{
    ConflictOutcome, ConflictPolicy, ConflictResolution, ConflictResolver, ConflictSnapshot,
};
pub use engine::{EngineSnapshot, SyncEngine, SyncStats};
pub use error::{IdentityError, IdentityResult, SyncError, SyncResult};
pub use identity::{IdentityCallback, IdentityProvider, InMemoryIdentityProvider};
pub use observer::{ObserverHandle, ObserverList};
pub use subscription::{ChangeSubscription, DeltaApplier, RemoteChange};
