//! Remote storage port.

use crate::error::StorageResult;
use async_trait::async_trait;
use packsync_model::{encode_records, parse_import, ImportReport, Metadata, Record, SerializedRecord};
use tokio::sync::mpsc;

/// An event delivered on a remote change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// The complete current record set of the bound partition.
    Snapshot(Vec<SerializedRecord>),
    /// The feed broke (network loss, revoked permission). No further events follow.
    Failed(String),
}

/// Receiving half of a remote change feed.
pub type RemoteFeed = mpsc::UnboundedReceiver<RemoteEvent>;

/// Per-identity record-set persistence shared across devices.
///
/// A remote store is bound to at most one identity at a time through
/// [`RemoteStore::set_identity`]; every data call operates on that
/// identity's partition and fails with
/// [`crate::StorageError::Unauthenticated`] when nothing is bound.
///
/// # Invariants
///
/// - `save` replaces the whole partition and stamps [`Metadata`] with the
///   remote clock
/// - `load` returns records sorted by `order` ascending
/// - A feed only carries changes made after `subscribe`, each as a full set
/// - At most one feed is open per store; `unsubscribe` closes it
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replaces the record set of the bound partition.
    async fn save(&self, records: &[Record]) -> StorageResult<()>;

    /// Loads the record set of the bound partition.
    async fn load(&self) -> StorageResult<Vec<Record>>;

    /// Removes the record set and metadata of the bound partition.
    async fn clear(&self) -> StorageResult<()>;

    /// Returns the partition metadata, if the partition was ever written.
    async fn metadata(&self) -> StorageResult<Option<Metadata>>;

    /// Returns true if the bound partition holds at least one record.
    async fn has_data(&self) -> StorageResult<bool>;

    /// Returns the approximate encoded size of the bound partition.
    async fn size_bytes(&self) -> StorageResult<u64>;

    /// Opens the change feed of the bound partition.
    fn subscribe(&self) -> StorageResult<RemoteFeed>;

    /// Closes the change feed, if open.
    fn unsubscribe(&self);

    /// Binds the store to `identity_id`, or unbinds it with `None`.
    fn set_identity(&self, identity_id: Option<String>);

    /// Returns the bound identity id.
    fn identity(&self) -> Option<String>;

    /// Exports the bound partition as a pretty-printed JSON array.
    async fn export(&self) -> StorageResult<String> {
        let records = self.load().await?;
        Ok(encode_records(&records)?)
    }

    /// Imports a JSON array into the bound partition, discarding invalid entries.
    async fn import(&self, json: &str) -> StorageResult<ImportReport> {
        let batch = parse_import(json)?;
        self.save(&batch.records).await?;
        Ok(batch.report())
    }
}
