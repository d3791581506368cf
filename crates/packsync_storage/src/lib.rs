//! # packsync storage
//!
//! Storage ports and backends for packsync.
//!
//! Two interchangeable contracts describe where a record set lives:
//!
//! - [`LocalStore`] - durable key-value persistence on this device, always
//!   available, no network
//! - [`RemoteStore`] - per-identity persistence shared across devices, with
//!   a change feed that ships the complete record set on every change
//!
//! ## Design Principles
//!
//! - Backends always read and write whole record sets
//! - Backends own the translation to their native shape; callers only see
//!   [`packsync_model::Record`]
//! - Each backend is the only writer of its own key or partition
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Backends
//!
//! - [`InMemoryLocalStore`] - For testing and ephemeral sessions
//! - [`FileLocalStore`] - JSON file on disk
//! - [`InMemoryRemoteStore`] - One device's handle onto a shared [`RemoteHub`]
//!
//! ## Example
//!
//! ```rust
//! use packsync_model::Record;
//! use packsync_storage::{InMemoryLocalStore, LocalStore};
//!
//! let store = InMemoryLocalStore::new();
//! store.save(&[Record::new(1, "passport", 1)]).unwrap();
//! assert_eq!(store.load().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod hub;
mod local;
mod memory;
mod remote;

pub use error::{StorageError, StorageResult};
pub use file::{FileLocalStore, DEFAULT_STORAGE_KEY};
pub use hub::{InMemoryRemoteStore, RemoteHub};
pub use local::LocalStore;
pub use memory::InMemoryLocalStore;
pub use remote::{RemoteEvent, RemoteFeed, RemoteStore};
