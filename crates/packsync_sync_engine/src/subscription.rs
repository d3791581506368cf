//! Real-time remote change subscription.
//!
//! At most one feed is open at a time. Each delivered snapshot is decoded,
//! handed to the [`DeltaApplier`] for conflict handling, then broadcast to
//! registered observers. A broken feed is reported once and not retried;
//! the next cloud-mode load opens a fresh one.

use crate::conflict::ConflictOutcome;
use crate::error::{SyncError, SyncResult};
use crate::observer::{ObserverHandle, ObserverList};
use packsync_model::{sort_by_order, Record, SerializedRecord};
use packsync_storage::{RemoteEvent, RemoteFeed, RemoteStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Receives remote deltas on behalf of the engine.
pub trait DeltaApplier: Send + Sync {
    /// Applies a remote record set.
    ///
    /// Returns `None` if the delta was ignored (local mode, torn down).
    fn apply_remote(&self, records: Vec<Record>) -> Option<ConflictOutcome>;

    /// Reports that the feed broke.
    fn feed_failed(&self, error: SyncError);
}

/// A remote change as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// The remote record set, sorted by order.
    pub records: Vec<Record>,
    /// What the engine did with it.
    pub outcome: ConflictOutcome,
}

struct ActiveFeed {
    identity_id: String,
    generation: u64,
    task: JoinHandle<()>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveFeed>>>;

/// Owner of the single remote change feed.
pub struct ChangeSubscription<R: RemoteStore> {
    remote: Arc<R>,
    active: ActiveSlot,
    observers: ObserverList<RemoteChange>,
    generation: AtomicU64,
}

impl<R: RemoteStore + 'static> ChangeSubscription<R> {
    /// Creates an idle subscription over `remote`.
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            active: Arc::new(Mutex::new(None)),
            observers: ObserverList::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Opens the feed for `identity_id`.
    ///
    /// Returns `Ok(false)` without doing anything if a feed is already open,
    /// whichever identity it belongs to. Must be called inside a Tokio runtime.
    pub fn start(&self, identity_id: &str, applier: Weak<dyn DeltaApplier>) -> SyncResult<bool> {
        let mut active = self.active.lock();
        if let Some(feed) = active.as_ref() {
            tracing::debug!(identity = %feed.identity_id, "subscription already active");
            return Ok(false);
        }

        let feed = self
            .remote
            .subscribe()
            .map_err(|e| SyncError::Subscription(e.to_string()))?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let task = tokio::spawn(pump(
            feed,
            generation,
            applier,
            self.observers.clone(),
            Arc::clone(&self.active),
        ));

        *active = Some(ActiveFeed {
            identity_id: identity_id.to_string(),
            generation,
            task,
        });
        tracing::info!(identity = %identity_id, generation, "remote subscription started");
        Ok(true)
    }

    /// Closes the feed if one is open. Idempotent.
    pub fn stop(&self) {
        let feed = self.active.lock().take();
        if let Some(feed) = feed {
            feed.task.abort();
            self.remote.unsubscribe();
            tracing::info!(identity = %feed.identity_id, "remote subscription stopped");
        }
    }

    /// Returns true while a feed is open.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Returns the identity the open feed belongs to.
    pub fn identity(&self) -> Option<String> {
        self.active.lock().as_ref().map(|f| f.identity_id.clone())
    }

    /// Registers an observer of applied remote changes.
    pub fn on_changed(
        &self,
        observer: impl Fn(&RemoteChange) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.observers.register(observer)
    }

    /// Returns the number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Drops every observer.
    pub fn clear_observers(&self) {
        self.observers.clear();
    }
}

impl<R: RemoteStore> Drop for ChangeSubscription<R> {
    fn drop(&mut self) {
        if let Some(feed) = self.active.lock().take() {
            feed.task.abort();
        }
    }
}

fn is_current(active: &ActiveSlot, generation: u64) -> bool {
    active
        .lock()
        .as_ref()
        .is_some_and(|f| f.generation == generation)
}

/// Releases the slot if it still belongs to `generation`.
fn release(active: &ActiveSlot, generation: u64) -> bool {
    let mut slot = active.lock();
    if slot.as_ref().is_some_and(|f| f.generation == generation) {
        *slot = None;
        true
    } else {
        false
    }
}

fn decode_snapshot(payload: Vec<SerializedRecord>) -> Vec<Record> {
    let mut records: Vec<Record> = payload
        .into_iter()
        .filter_map(|serialized| {
            let id = serialized.id;
            match Record::try_from(serialized) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(id, error = %e, "dropping malformed remote record");
                    None
                }
            }
        })
        .collect();
    sort_by_order(&mut records);
    records
}

async fn pump(
    mut feed: RemoteFeed,
    generation: u64,
    applier: Weak<dyn DeltaApplier>,
    observers: ObserverList<RemoteChange>,
    active: ActiveSlot,
) {
    let reason = loop {
        let Some(event) = feed.recv().await else {
            break "remote feed closed".to_string();
        };
        if !is_current(&active, generation) {
            return;
        }

        match event {
            RemoteEvent::Snapshot(payload) => {
                let records = decode_snapshot(payload);
                let Some(applier) = applier.upgrade() else {
                    return;
                };
                let Some(outcome) = applier.apply_remote(records.clone()) else {
                    continue;
                };
                tracing::debug!(records = records.len(), ?outcome, "remote change applied");
                observers.notify(&RemoteChange { records, outcome });
            }
            RemoteEvent::Failed(reason) => break reason,
        }
    };

    if !release(&active, generation) {
        return;
    }
    tracing::warn!(%reason, "remote subscription failed");
    if let Some(applier) = applier.upgrade() {
        applier.feed_failed(SyncError::Subscription(reason));
    }
}
