//! In-memory remote storage shared between simulated devices.

use crate::error::{StorageError, StorageResult};
use crate::remote::{RemoteEvent, RemoteFeed, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use packsync_model::{Metadata, Record, SerializedRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One identity's slice of the hub: `users/{id}/checkItems` and `users/{id}/metadata`.
#[derive(Debug, Default)]
struct Partition {
    items: BTreeMap<i64, SerializedRecord>,
    metadata: Option<Metadata>,
}

impl Partition {
    fn snapshot(&self) -> Vec<SerializedRecord> {
        let mut items: Vec<SerializedRecord> = self.items.values().cloned().collect();
        items.sort_by_key(|r| r.order);
        items
    }
}

#[derive(Debug)]
struct Feed {
    store_id: u64,
    identity: String,
    sender: mpsc::UnboundedSender<RemoteEvent>,
}

#[derive(Debug, Default)]
struct HubInner {
    partitions: RwLock<HashMap<String, Partition>>,
    feeds: Mutex<Vec<Feed>>,
    next_store_id: AtomicU64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

/// A shared in-memory remote store.
///
/// The hub plays the server: it keeps one partition per identity, stamps
/// metadata with its own clock and pushes the full partition to every open
/// feed after each write, including the writer's own feed. Each simulated
/// device talks to it through its own [`InMemoryRemoteStore`].
///
/// # Example
///
/// ```rust
/// use packsync_storage::RemoteHub;
///
/// let hub = RemoteHub::new();
/// let phone = hub.store();
/// let laptop = hub.store();
/// # let _ = (phone, laptop);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RemoteHub {
    inner: Arc<HubInner>,
}

impl RemoteHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new device handle onto this hub, bound to no identity.
    #[must_use]
    pub fn store(&self) -> InMemoryRemoteStore {
        InMemoryRemoteStore {
            hub: self.clone(),
            store_id: self.inner.next_store_id.fetch_add(1, Ordering::SeqCst),
            identity: RwLock::new(None),
        }
    }

    /// Makes subsequent writes fail as if the network were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent reads fail as if the network were down.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Breaks every open feed with `reason`.
    pub fn drop_feeds(&self, reason: &str) {
        let feeds = std::mem::take(&mut *self.inner.feeds.lock());
        tracing::debug!(count = feeds.len(), reason, "dropping remote feeds");
        for feed in feeds {
            let _ = feed.sender.send(RemoteEvent::Failed(reason.to_string()));
        }
    }

    /// Returns the records stored for `identity_id`.
    pub fn records(&self, identity_id: &str) -> Vec<Record> {
        self.inner
            .partitions
            .read()
            .get(identity_id)
            .map(|p| {
                p.snapshot()
                    .into_iter()
                    .filter_map(|s| Record::try_from(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the metadata stored for `identity_id`.
    pub fn metadata(&self, identity_id: &str) -> Option<Metadata> {
        self.inner
            .partitions
            .read()
            .get(identity_id)
            .and_then(|p| p.metadata)
    }

    /// Returns the number of open feeds across all identities.
    pub fn open_feeds(&self) -> usize {
        self.inner.feeds.lock().len()
    }

    /// Returns the number of open feeds on `identity_id`'s partition.
    pub fn open_feeds_for(&self, identity_id: &str) -> usize {
        self.inner
            .feeds
            .lock()
            .iter()
            .filter(|f| f.identity == identity_id)
            .count()
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("network unreachable".into()));
        }
        Ok(())
    }

    fn check_writes(&self) -> StorageResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("network unreachable".into()));
        }
        Ok(())
    }

    fn write(&self, identity_id: &str, records: &[Record]) {
        let snapshot = {
            let mut partitions = self.inner.partitions.write();
            let partition = partitions.entry(identity_id.to_string()).or_default();
            partition.items = records.iter().map(|r| (r.id, r.serialize())).collect();
            partition.metadata = Some(Metadata {
                last_updated: Utc::now(),
                record_count: partition.items.len(),
            });
            partition.snapshot()
        };
        self.broadcast(identity_id, snapshot);
    }

    fn remove(&self, identity_id: &str) {
        self.inner.partitions.write().remove(identity_id);
        self.broadcast(identity_id, Vec::new());
    }

    fn read(&self, identity_id: &str) -> StorageResult<Vec<Record>> {
        let snapshot = self
            .inner
            .partitions
            .read()
            .get(identity_id)
            .map(Partition::snapshot)
            .unwrap_or_default();
        snapshot
            .into_iter()
            .map(|s| Record::try_from(s).map_err(StorageError::from))
            .collect()
    }

    fn broadcast(&self, identity_id: &str, snapshot: Vec<SerializedRecord>) {
        let mut feeds = self.inner.feeds.lock();
        feeds.retain(|feed| {
            if feed.identity != identity_id {
                return true;
            }
            feed.sender
                .send(RemoteEvent::Snapshot(snapshot.clone()))
                .is_ok()
        });
    }

    fn open_feed(&self, store_id: u64, identity_id: &str) -> RemoteFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut feeds = self.inner.feeds.lock();
        feeds.retain(|f| f.store_id != store_id);
        feeds.push(Feed {
            store_id,
            identity: identity_id.to_string(),
            sender,
        });
        receiver
    }

    fn close_feeds(&self, store_id: u64) {
        self.inner.feeds.lock().retain(|f| f.store_id != store_id);
    }
}

/// One device's handle onto a [`RemoteHub`].
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    hub: RemoteHub,
    store_id: u64,
    identity: RwLock<Option<String>>,
}

impl InMemoryRemoteStore {
    /// Creates a handle onto a private hub.
    #[must_use]
    pub fn new() -> Self {
        RemoteHub::new().store()
    }

    /// Returns the hub this handle talks to.
    #[must_use]
    pub fn hub(&self) -> &RemoteHub {
        &self.hub
    }

    fn bound(&self) -> StorageResult<String> {
        self.identity.read().clone().ok_or(StorageError::Unauthenticated)
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryRemoteStore {
    fn drop(&mut self) {
        self.hub.close_feeds(self.store_id);
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn save(&self, records: &[Record]) -> StorageResult<()> {
        let identity = self.bound()?;
        self.hub.check_writes()?;
        self.hub.write(&identity, records);
        tracing::debug!(identity = %identity, count = records.len(), "saved remote records");
        Ok(())
    }

    async fn load(&self) -> StorageResult<Vec<Record>> {
        let identity = self.bound()?;
        self.hub.check_reads()?;
        self.hub.read(&identity)
    }

    async fn clear(&self) -> StorageResult<()> {
        let identity = self.bound()?;
        self.hub.check_writes()?;
        self.hub.remove(&identity);
        Ok(())
    }

    async fn metadata(&self) -> StorageResult<Option<Metadata>> {
        let identity = self.bound()?;
        self.hub.check_reads()?;
        Ok(self.hub.metadata(&identity))
    }

    async fn has_data(&self) -> StorageResult<bool> {
        Ok(!self.load().await?.is_empty())
    }

    async fn size_bytes(&self) -> StorageResult<u64> {
        let records = self.load().await?;
        let serialized: Vec<SerializedRecord> = records.iter().map(Record::serialize).collect();
        let json = serde_json::to_string(&serialized)
            .map_err(|e| StorageError::Corrupted(e.to_string()))?;
        Ok(json.len() as u64)
    }

    fn subscribe(&self) -> StorageResult<RemoteFeed> {
        let identity = self.bound()?;
        self.hub.check_reads()?;
        Ok(self.hub.open_feed(self.store_id, &identity))
    }

    fn unsubscribe(&self) {
        self.hub.close_feeds(self.store_id);
    }

    fn set_identity(&self, identity_id: Option<String>) {
        let mut current = self.identity.write();
        if *current != identity_id {
            self.hub.close_feeds(self.store_id);
            *current = identity_id;
        }
    }

    fn identity(&self) -> Option<String> {
        self.identity.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_store(hub: &RemoteHub, identity: &str) -> InMemoryRemoteStore {
        let store = hub.store();
        store.set_identity(Some(identity.to_string()));
        store
    }

    #[tokio::test]
    async fn unbound_store_is_unauthenticated() {
        let store = InMemoryRemoteStore::new();
        assert!(matches!(store.load().await, Err(StorageError::Unauthenticated)));
        assert!(matches!(
            store.save(&[]).await,
            Err(StorageError::Unauthenticated)
        ));
        assert!(store.subscribe().is_err());
    }

    #[tokio::test]
    async fn save_stamps_metadata() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        assert!(store.metadata().await.unwrap().is_none());

        store
            .save(&[Record::new(1, "a", 1), Record::new(2, "b", 2)])
            .await
            .unwrap();
        let meta = store.metadata().await.unwrap().unwrap();
        assert_eq!(meta.record_count, 2);
        assert!(store.has_data().await.unwrap());
        assert!(store.size_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let hub = RemoteHub::new();
        let alice = bound_store(&hub, "alice");
        let bob = bound_store(&hub, "bob");

        alice.save(&[Record::new(1, "a", 1)]).await.unwrap();
        assert!(bob.load().await.unwrap().is_empty());
        assert_eq!(hub.records("alice").len(), 1);
    }

    #[tokio::test]
    async fn load_sorts_by_order() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        store
            .save(&[Record::new(1, "late", 9), Record::new(2, "early", 1)])
            .await
            .unwrap();
        let ids: Vec<_> = store.load().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn writes_fan_out_to_every_feed() {
        let hub = RemoteHub::new();
        let phone = bound_store(&hub, "u1");
        let laptop = bound_store(&hub, "u1");
        let mut phone_feed = phone.subscribe().unwrap();
        let mut laptop_feed = laptop.subscribe().unwrap();

        laptop.save(&[Record::new(1, "a", 1)]).await.unwrap();

        for feed in [&mut phone_feed, &mut laptop_feed] {
            match feed.recv().await.unwrap() {
                RemoteEvent::Snapshot(items) => assert_eq!(items.len(), 1),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn feeds_only_see_their_partition() {
        let hub = RemoteHub::new();
        let alice = bound_store(&hub, "alice");
        let bob = bound_store(&hub, "bob");
        let mut feed = alice.subscribe().unwrap();

        bob.save(&[Record::new(1, "b", 1)]).await.unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_closes_feed() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        let mut feed = store.subscribe().unwrap();
        assert_eq!(hub.open_feeds_for("u1"), 1);

        store.unsubscribe();
        assert_eq!(hub.open_feeds(), 0);
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn rebinding_identity_closes_feed() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        let _feed = store.subscribe().unwrap();
        store.set_identity(Some("u2".into()));
        assert_eq!(hub.open_feeds(), 0);
        assert_eq!(store.identity().as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn clear_removes_partition_and_notifies() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        store.save(&[Record::new(1, "a", 1)]).await.unwrap();
        let mut feed = store.subscribe().unwrap();

        store.clear().await.unwrap();
        assert!(store.metadata().await.unwrap().is_none());
        assert_eq!(feed.recv().await, Some(RemoteEvent::Snapshot(Vec::new())));
    }

    #[tokio::test]
    async fn injected_failures() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        hub.set_fail_writes(true);
        assert!(matches!(
            store.save(&[]).await,
            Err(StorageError::Unavailable(_))
        ));
        hub.set_fail_writes(false);
        hub.set_fail_reads(true);
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn drop_feeds_reports_failure() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        let mut feed = store.subscribe().unwrap();

        hub.drop_feeds("connection reset");
        assert_eq!(
            feed.recv().await,
            Some(RemoteEvent::Failed("connection reset".into()))
        );
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn remote_export_import() {
        let hub = RemoteHub::new();
        let store = bound_store(&hub, "u1");
        let report = store
            .import(r#"[{"id":1,"text":"a","done":false,"createdAt":"2024-01-01T00:00:00Z","order":1},{"bad":true}]"#)
            .await
            .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.discarded, 1);
        assert!(store.export().await.unwrap().contains("\"createdAt\""));
    }
}
