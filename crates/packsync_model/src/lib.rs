//! # packsync model
//!
//! Plain data shapes shared by every packsync crate.
//!
//! This crate provides:
//! - [`Record`] and its wire shape [`SerializedRecord`]
//! - JSON encoding, strict decoding and lenient import validation
//! - Remote [`Metadata`]
//! - Identity and sync-state value types observed by the UI
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - `id` is the identity key for every compare/merge/serialize operation
//! - A record set is a set keyed by `id`, never an append log
//! - Loaded record sets are sorted by `order` ascending

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod identity;
mod record;
mod state;

pub use codec::{decode_records, encode_records, parse_import, ImportBatch, ImportReport};
pub use error::{CodecError, CodecResult};
pub use identity::{Identity, IdentityState};
pub use record::{canonical_key, normalize_order, sort_by_order, Metadata, Record, SerializedRecord};
pub use state::{SyncMode, SyncState, SyncStatus};
