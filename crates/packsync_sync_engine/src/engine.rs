//! Sync engine state machine.
//!
//! The engine owns the authoritative in-memory record set and decides,
//! from the current [`SyncMode`] and identity, which backend each
//! operation touches.
//!
//! ```text
//!            switch_to_cloud_mode (identity can sync)
//!   LocalOnly ─────────────────────────────────────▶ CloudActive
//!       ▲                                                │
//!       └────────────────────────────────────────────────┘
//!          switch_to_local_mode / sign_out / identity lost
//! ```
//!
//! In `LocalOnly` the status is pinned to [`SyncStatus::Offline`] and no
//! remote call is ever made. In `CloudActive` every cloud operation moves
//! the status through `Syncing` to `Synced` or `Error`.

use crate::config::{LoadPrecedence, SyncConfig};
use crate::conflict::{
    ConflictOutcome, ConflictPolicy, ConflictResolution, ConflictResolver, ConflictSnapshot,
};
use crate::error::{IdentityError, SyncError, SyncResult};
use crate::identity::IdentityProvider;
use crate::observer::ObserverHandle;
use crate::subscription::{ChangeSubscription, DeltaApplier, RemoteChange};
use chrono::{DateTime, Utc};
use packsync_model::{
    parse_import, Identity, IdentityState, ImportReport, Record, SyncMode, SyncState, SyncStatus,
};
use packsync_storage::{LocalStore, RemoteStore};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Successful cloud writes (saves, pushes, seeds).
    pub cloud_writes: u64,
    /// Successful cloud reads.
    pub cloud_reads: u64,
    /// Remote deltas handed to the engine by the subscription.
    pub remote_changes_received: u64,
    /// Remote deltas that differed from the in-memory set.
    pub conflicts_detected: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Everything an observer of the engine needs to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// The in-memory record set, sorted by order.
    pub records: Arc<Vec<Record>>,
    /// Sync status and flags.
    pub sync: SyncState,
    /// Last identity state reported by the provider.
    pub identity: IdentityState,
    /// Current mode.
    pub mode: SyncMode,
}

#[derive(Debug)]
struct EngineState {
    mode: SyncMode,
    records: Arc<Vec<Record>>,
    sync: SyncState,
    identity: IdentityState,
    bound_identity: Option<String>,
    pending_conflict: Option<ConflictSnapshot>,
    pending_writes: Vec<Arc<Vec<Record>>>,
    stats: SyncStats,
}

impl EngineState {
    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            records: Arc::clone(&self.records),
            sync: self.sync,
            identity: self.identity.clone(),
            mode: self.mode,
        }
    }

    fn can_sync(&self) -> bool {
        self.mode.is_cloud() && self.identity.can_sync()
    }

    /// Returns true if `remote` is a set this engine is currently writing.
    fn is_own_write(&self, remote: &[Record]) -> bool {
        self.pending_writes
            .iter()
            .any(|written| !ConflictResolver::is_conflict(written, remote))
    }
}

/// A record set in flight to the remote, registered until dropped.
///
/// The remote echoes every write on the writer's own feed, possibly before
/// the write call returns.
struct PendingWrite<'a> {
    state: &'a RwLock<EngineState>,
    records: Arc<Vec<Record>>,
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write();
        if let Some(pos) = state
            .pending_writes
            .iter()
            .position(|written| Arc::ptr_eq(written, &self.records))
        {
            state.pending_writes.swap_remove(pos);
        }
    }
}

struct EngineInner<L, R, I>
where
    R: RemoteStore,
{
    config: SyncConfig,
    local: Arc<L>,
    remote: Arc<R>,
    identity: Arc<I>,
    resolver: RwLock<ConflictResolver>,
    subscription: ChangeSubscription<R>,
    state: RwLock<EngineState>,
    notifier: watch::Sender<EngineSnapshot>,
    transitions: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    cleaned_up: AtomicBool,
    identity_listener: Mutex<Option<ObserverHandle>>,
    identity_task: Mutex<Option<JoinHandle<()>>>,
}

impl<L, R, I> EngineInner<L, R, I>
where
    L: LocalStore,
    R: RemoteStore,
    I: IdentityProvider,
{
    /// Mutates the state under the write lock, then publishes a snapshot.
    fn update<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let (out, snapshot) = {
            let mut state = self.state.write();
            let out = f(&mut state);
            (out, state.snapshot())
        };
        self.notifier.send_replace(snapshot);
        out
    }

    fn track_write(&self, records: &[Record]) -> PendingWrite<'_> {
        let records = Arc::new(records.to_vec());
        self.state.write().pending_writes.push(Arc::clone(&records));
        PendingWrite {
            state: &self.state,
            records,
        }
    }

    fn begin_cloud_op(&self) {
        self.update(|s| s.sync.status = SyncStatus::Syncing);
    }

    fn fail_cloud_op(&self, error: SyncError) -> SyncError {
        tracing::warn!(%error, "cloud operation failed");
        self.update(|s| {
            if s.mode.is_cloud() {
                s.sync.status = SyncStatus::Error;
            }
            s.stats.last_error = Some(error.to_string());
        });
        error
    }

    fn record_local_error(&self, error: SyncError) -> SyncError {
        tracing::error!(%error, "local storage operation failed");
        self.update(|s| s.stats.last_error = Some(error.to_string()));
        error
    }
}

impl<L, R, I> DeltaApplier for EngineInner<L, R, I>
where
    L: LocalStore,
    R: RemoteStore,
    I: IdentityProvider,
{
    fn apply_remote(&self, remote: Vec<Record>) -> Option<ConflictOutcome> {
        if self.cleaned_up.load(Ordering::SeqCst) {
            return None;
        }
        let resolver = *self.resolver.read();

        let outcome = self.update(|s| {
            if !s.mode.is_cloud() {
                return None;
            }
            s.stats.remote_changes_received += 1;

            let outcome = if s.is_own_write(&remote) {
                ConflictOutcome::InSync
            } else {
                resolver.resolve(&s.records, &remote)
            };
            if outcome.is_conflict() {
                s.stats.conflicts_detected += 1;
            }
            match &outcome {
                ConflictOutcome::InSync => {
                    s.sync.has_remote_changes = false;
                    s.pending_conflict = None;
                }
                ConflictOutcome::KeptLocal => {
                    s.sync.has_remote_changes = true;
                }
                ConflictOutcome::AcceptedRemote(records) => {
                    s.records = Arc::new(records.clone());
                    s.sync.has_remote_changes = false;
                    s.sync.has_local_changes = false;
                    s.pending_conflict = None;
                }
                ConflictOutcome::Deferred(snapshot) => {
                    s.sync.has_remote_changes = true;
                    s.pending_conflict = Some(snapshot.clone());
                }
            }
            Some(outcome)
        })?;

        match &outcome {
            ConflictOutcome::KeptLocal => {
                tracing::info!("remote changes detected; keeping local set");
            }
            ConflictOutcome::AcceptedRemote(records) => {
                tracing::info!(records = records.len(), "accepted remote set");
                if let Err(e) = self.local.save(records) {
                    tracing::warn!(error = %e, "failed to persist accepted remote set locally");
                }
            }
            ConflictOutcome::Deferred(_) => {
                tracing::info!("remote changes held for manual resolution");
            }
            ConflictOutcome::InSync => {}
        }
        Some(outcome)
    }

    fn feed_failed(&self, error: SyncError) {
        if self.cleaned_up.load(Ordering::SeqCst) {
            return;
        }
        self.fail_cloud_op(error);
    }
}

impl<L, R, I> Drop for EngineInner<L, R, I>
where
    R: RemoteStore,
{
    fn drop(&mut self) {
        if let Some(handle) = self.identity_listener.lock().take() {
            handle.unsubscribe();
        }
        if let Some(task) = self.identity_task.lock().take() {
            task.abort();
        }
    }
}

/// Local-first sync engine for one record set.
///
/// The engine is a cheap handle; clones share the same state.
pub struct SyncEngine<L, R, I>
where
    R: RemoteStore,
{
    inner: Arc<EngineInner<L, R, I>>,
}

impl<L, R, I> Clone for SyncEngine<L, R, I>
where
    R: RemoteStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, R, I> SyncEngine<L, R, I>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
    I: IdentityProvider + 'static,
{
    /// Creates a new engine in local mode.
    pub fn new(config: SyncConfig, local: L, remote: R, identity: I) -> Self {
        Self::from_shared(config, Arc::new(local), Arc::new(remote), Arc::new(identity))
    }

    /// Creates a new engine over shared backends.
    pub fn from_shared(config: SyncConfig, local: Arc<L>, remote: Arc<R>, identity: Arc<I>) -> Self {
        let state = EngineState {
            mode: SyncMode::LocalOnly,
            records: Arc::new(Vec::new()),
            sync: SyncState::default(),
            identity: identity.current(),
            bound_identity: None,
            pending_conflict: None,
            pending_writes: Vec::new(),
            stats: SyncStats::default(),
        };
        let (notifier, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(EngineInner {
                resolver: RwLock::new(ConflictResolver::new(config.conflict_policy)),
                subscription: ChangeSubscription::new(Arc::clone(&remote)),
                config,
                local,
                remote,
                identity,
                state: RwLock::new(state),
                notifier,
                transitions: tokio::sync::Mutex::new(()),
                initialized: AtomicBool::new(false),
                cleaned_up: AtomicBool::new(false),
                identity_listener: Mutex::new(None),
                identity_task: Mutex::new(None),
            }),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Gets the local store.
    pub fn local_store(&self) -> &Arc<L> {
        &self.inner.local
    }

    /// Gets the remote store.
    pub fn remote_store(&self) -> &Arc<R> {
        &self.inner.remote
    }

    /// Gets the identity provider.
    pub fn identity_provider(&self) -> &Arc<I> {
        &self.inner.identity
    }

    /// Gets the in-memory record set.
    pub fn records(&self) -> Vec<Record> {
        self.inner.state.read().records.as_ref().clone()
    }

    /// Gets the sync state.
    pub fn sync_state(&self) -> SyncState {
        self.inner.state.read().sync
    }

    /// Gets the last reported identity state.
    pub fn identity_state(&self) -> IdentityState {
        self.inner.state.read().identity.clone()
    }

    /// Gets the current mode.
    pub fn mode(&self) -> SyncMode {
        self.inner.state.read().mode
    }

    /// Returns true in cloud mode.
    pub fn is_cloud_mode(&self) -> bool {
        self.mode().is_cloud()
    }

    /// Returns true if the identity allows cloud operations.
    pub fn can_sync_to_cloud(&self) -> bool {
        self.inner.state.read().identity.can_sync()
    }

    /// Gets the stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.state.read().stats.clone()
    }

    /// Gets a full snapshot of the observable state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.state.read().snapshot()
    }

    /// Returns a receiver notified after every state change.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.notifier.subscribe()
    }

    /// Returns the deferred conflict, if any.
    pub fn pending_conflict(&self) -> Option<ConflictSnapshot> {
        self.inner.state.read().pending_conflict.clone()
    }

    /// Sets the conflict policy for subsequent remote deltas.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.inner.resolver.write() = ConflictResolver::new(policy);
    }

    /// Gets the conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.inner.resolver.read().policy()
    }

    /// Returns true once `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Returns true while the remote change feed is open.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.is_active()
    }

    /// Size of the locally persisted set in bytes.
    pub fn local_size_bytes(&self) -> u64 {
        self.inner.local.size_bytes()
    }

    /// Registers an observer of remote changes.
    pub fn on_remote_change(
        &self,
        observer: impl Fn(&RemoteChange) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.inner.subscription.on_changed(observer)
    }

    /// Starts listening to identity changes and loads the initial set.
    ///
    /// Calling it again is a no-op. Must be called inside a Tokio runtime.
    pub async fn initialize(&self) -> SyncResult<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("engine already initialized");
            return Ok(());
        }

        // The callback records the state synchronously; the listener task
        // only learns that something changed and re-reads the latest state.
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let weak = Arc::downgrade(&self.inner);
        let callback_weak = Weak::clone(&weak);

        let handle = self.inner.identity.on_identity_changed(Box::new(move |state: &IdentityState| {
            if let Some(inner) = callback_weak.upgrade() {
                inner.update(|s| s.identity = state.clone());
            }
            let _ = tx.send(());
        }));
        *self.inner.identity_listener.lock() = Some(handle);

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncEngine { inner }.handle_identity_change().await;
            }
        });
        *self.inner.identity_task.lock() = Some(task);

        tracing::info!(mode = %self.mode(), "sync engine initialized");
        self.load().await.map(|_| ())
    }

    async fn handle_identity_change(&self) {
        if self.inner.cleaned_up.load(Ordering::SeqCst) {
            return;
        }
        let (mode, bound, state) = {
            let s = self.inner.state.read();
            (s.mode, s.bound_identity.clone(), s.identity.clone())
        };
        if !mode.is_cloud() || state.is_loading {
            return;
        }

        match state.identity_id() {
            None => {
                tracing::info!("identity lost; leaving cloud mode");
                if let Err(e) = self.switch_to_local_mode().await {
                    tracing::warn!(error = %e, "failed to reload after leaving cloud mode");
                }
            }
            Some(id) if bound.as_deref() != Some(id) => {
                tracing::info!(identity = %id, "identity changed; rebinding remote");
                if let Err(e) = self.switch_to_cloud_mode().await {
                    tracing::warn!(error = %e, "failed to rebind remote to new identity");
                }
            }
            Some(_) => {}
        }
    }

    fn require_initialized(&self) -> SyncResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    fn require_identity(&self) -> SyncResult<String> {
        let state = self.inner.state.read();
        if state.identity.is_loading {
            return Err(IdentityError::Loading.into());
        }
        state
            .identity
            .identity_id()
            .map(str::to_string)
            .ok_or_else(|| IdentityError::NotAuthenticated.into())
    }

    fn require_cloud(&self) -> SyncResult<()> {
        self.require_identity()?;
        if self.is_cloud_mode() {
            Ok(())
        } else {
            Err(SyncError::CloudModeRequired)
        }
    }

    fn cloud_ready(&self) -> bool {
        self.inner.state.read().can_sync()
    }

    fn ensure_subscription(&self) -> SyncResult<()> {
        if !self.inner.config.realtime || self.inner.subscription.is_active() {
            return Ok(());
        }
        let bound = self.inner.state.read().bound_identity.clone();
        let Some(identity_id) = bound else {
            return Ok(());
        };
        let applier: Arc<dyn DeltaApplier> = self.inner.clone();
        self.inner
            .subscription
            .start(&identity_id, Arc::downgrade(&applier))
            .map(|_| ())
    }

    /// Reads the remote clock; keeps the previous value when unavailable.
    async fn remote_sync_time(&self) -> Option<DateTime<Utc>> {
        match self.inner.remote.metadata().await {
            Ok(Some(metadata)) => Some(metadata.last_updated),
            Ok(None) => self.sync_state().last_sync_time,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read remote metadata");
                self.sync_state().last_sync_time
            }
        }
    }

    /// Persists `records` and makes them the in-memory set.
    ///
    /// In cloud mode both backends are written concurrently. A partial
    /// failure leaves the status at `Error` without rolling back the side
    /// that succeeded.
    ///
    /// While the identity cannot sync, including a cloud-mode identity that
    /// is still loading, only local storage is written: the set is marked
    /// as holding local changes and the status is left as it was. The next
    /// cloud load or push picks the write up.
    pub async fn save(&self, records: Vec<Record>) -> SyncResult<()> {
        if !self.cloud_ready() {
            if let Err(e) = self.inner.local.save(&records) {
                return Err(self.inner.record_local_error(SyncError::local(e)));
            }
            tracing::debug!(records = records.len(), "saved locally");
            self.inner.update(|s| {
                s.records = Arc::new(records);
                s.sync.has_local_changes = true;
            });
            return Ok(());
        }

        let _write = self.inner.track_write(&records);
        self.inner.begin_cloud_op();
        let local = Arc::clone(&self.inner.local);
        let (local_result, remote_result) = tokio::join!(
            async { local.save(&records) },
            self.inner.remote.save(&records)
        );

        let error = match (local_result, remote_result) {
            (Ok(()), Ok(())) => None,
            (Err(e), remote_result) => {
                if remote_result.is_ok() {
                    self.inner.update(|s| s.records = Arc::new(records.clone()));
                }
                Some(SyncError::local(e))
            }
            (Ok(()), Err(e)) => {
                self.inner.update(|s| s.records = Arc::new(records.clone()));
                Some(SyncError::remote(e))
            }
        };
        if let Some(error) = error {
            return Err(self.inner.fail_cloud_op(error));
        }

        let synced_at = self.remote_sync_time().await;
        tracing::debug!(records = records.len(), "saved to both backends");
        self.inner.update(|s| {
            s.records = Arc::new(records);
            s.sync.has_local_changes = false;
            s.sync.last_sync_time = synced_at;
            s.sync.status = SyncStatus::Synced;
            s.stats.cloud_writes += 1;
        });
        Ok(())
    }

    /// Loads the record set for the current mode into memory.
    ///
    /// In cloud mode a non-empty remote set is authoritative; otherwise the
    /// local set seeds the remote.
    pub async fn load(&self) -> SyncResult<Vec<Record>> {
        if !self.cloud_ready() {
            let records = self
                .inner
                .local
                .load()
                .map_err(|e| self.inner.record_local_error(SyncError::local(e)))?;
            self.inner.update(|s| s.records = Arc::new(records.clone()));
            return Ok(records);
        }

        self.inner.begin_cloud_op();
        self.ensure_subscription()
            .map_err(|e| self.inner.fail_cloud_op(e))?;

        let (remote_records, metadata) =
            tokio::join!(self.inner.remote.load(), self.inner.remote.metadata());
        let remote_records =
            remote_records.map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
        let metadata = metadata.map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;

        let dirty = self.sync_state().has_local_changes;
        let prefer_local =
            dirty && self.inner.config.load_precedence == LoadPrecedence::LocalWhenDirty;

        if !remote_records.is_empty() && !prefer_local {
            if dirty {
                tracing::warn!("remote set replaces unsynced local edits");
            }
            self.inner
                .local
                .save(&remote_records)
                .map_err(|e| self.inner.fail_cloud_op(SyncError::local(e)))?;

            tracing::info!(records = remote_records.len(), "loaded from cloud");
            let synced_at = metadata.map(|m| m.last_updated);
            self.inner.update(|s| {
                s.records = Arc::new(remote_records.clone());
                s.sync.has_local_changes = false;
                s.sync.has_remote_changes = false;
                s.sync.last_sync_time = synced_at.or(s.sync.last_sync_time);
                s.sync.status = SyncStatus::Synced;
                s.pending_conflict = None;
                s.stats.cloud_reads += 1;
            });
            return Ok(remote_records);
        }

        let local_records = self
            .inner
            .local
            .load()
            .map_err(|e| self.inner.fail_cloud_op(SyncError::local(e)))?;

        if local_records.is_empty() && !prefer_local {
            self.inner.update(|s| {
                s.records = Arc::new(Vec::new());
                s.sync.has_remote_changes = false;
                s.sync.last_sync_time = metadata.map(|m| m.last_updated);
                s.sync.status = SyncStatus::Synced;
                s.stats.cloud_reads += 1;
            });
            return Ok(Vec::new());
        }

        let _write = self.inner.track_write(&local_records);
        self.inner
            .remote
            .save(&local_records)
            .await
            .map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
        let synced_at = self.remote_sync_time().await;

        tracing::info!(records = local_records.len(), "seeded cloud from local set");
        self.inner.update(|s| {
            s.records = Arc::new(local_records.clone());
            s.sync.has_local_changes = false;
            s.sync.has_remote_changes = false;
            s.sync.last_sync_time = synced_at;
            s.sync.status = SyncStatus::Synced;
            s.pending_conflict = None;
            s.stats.cloud_writes += 1;
        });
        Ok(local_records)
    }

    /// Pushes the locally persisted set to the remote.
    pub async fn sync_to_cloud(&self) -> SyncResult<()> {
        self.require_initialized()?;
        self.require_cloud()?;

        self.inner.begin_cloud_op();
        let records = self
            .inner
            .local
            .load()
            .map_err(|e| self.inner.fail_cloud_op(SyncError::local(e)))?;
        let _write = self.inner.track_write(&records);
        self.inner
            .remote
            .save(&records)
            .await
            .map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
        let synced_at = self.remote_sync_time().await;

        tracing::info!(records = records.len(), "pushed local set to cloud");
        self.inner.update(|s| {
            s.records = Arc::new(records);
            s.sync.has_local_changes = false;
            s.sync.has_remote_changes = false;
            s.sync.last_sync_time = synced_at;
            s.sync.status = SyncStatus::Synced;
            s.pending_conflict = None;
            s.stats.cloud_writes += 1;
        });
        Ok(())
    }

    /// Replaces the local set with the remote one.
    pub async fn sync_from_cloud(&self) -> SyncResult<Vec<Record>> {
        self.require_initialized()?;
        self.require_cloud()?;

        self.inner.begin_cloud_op();
        self.ensure_subscription()
            .map_err(|e| self.inner.fail_cloud_op(e))?;

        let (records, metadata) =
            tokio::join!(self.inner.remote.load(), self.inner.remote.metadata());
        let records = records.map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
        let metadata = metadata.map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
        self.inner
            .local
            .save(&records)
            .map_err(|e| self.inner.fail_cloud_op(SyncError::local(e)))?;

        tracing::info!(records = records.len(), "pulled cloud set");
        let synced_at = metadata.map(|m| m.last_updated);
        self.inner.update(|s| {
            s.records = Arc::new(records.clone());
            s.sync.has_local_changes = false;
            s.sync.has_remote_changes = false;
            s.sync.last_sync_time = synced_at.or(s.sync.last_sync_time);
            s.sync.status = SyncStatus::Synced;
            s.pending_conflict = None;
            s.stats.cloud_reads += 1;
        });
        Ok(records)
    }

    /// Enters cloud mode for the current identity and loads.
    ///
    /// Switching again for the same identity keeps the open feed; a
    /// different identity closes it before the remote is rebound.
    pub async fn switch_to_cloud_mode(&self) -> SyncResult<()> {
        self.require_initialized()?;
        let _guard = self.inner.transitions.lock().await;

        let identity_id = self.require_identity()?;
        tracing::info!(identity = %identity_id, "switching to cloud mode");

        if self.inner.subscription.identity().as_deref() != Some(identity_id.as_str()) {
            self.inner.subscription.stop();
        }
        if self.inner.remote.identity().as_deref() != Some(identity_id.as_str()) {
            self.inner.remote.set_identity(Some(identity_id.clone()));
        }
        self.inner.update(|s| {
            s.mode = SyncMode::CloudActive;
            s.bound_identity = Some(identity_id);
            s.sync.status = SyncStatus::Syncing;
        });

        self.load().await.map(|_| ())
    }

    /// Leaves cloud mode, closes the feed and reloads from local storage.
    pub async fn switch_to_local_mode(&self) -> SyncResult<()> {
        let _guard = self.inner.transitions.lock().await;

        tracing::info!("switching to local mode");
        self.inner.subscription.stop();
        self.inner.remote.set_identity(None);
        self.inner.update(|s| {
            s.mode = SyncMode::LocalOnly;
            s.bound_identity = None;
            s.sync.status = SyncStatus::Offline;
            s.sync.has_remote_changes = false;
            s.pending_conflict = None;
        });

        self.load().await.map(|_| ())
    }

    /// Signs in and, on success, enters cloud mode.
    ///
    /// Returns `Ok(None)` when the provider completes the flow later.
    pub async fn sign_in(&self) -> SyncResult<Option<Identity>> {
        let result = self.inner.identity.sign_in().await;
        let current = self.inner.identity.current();
        self.inner.update(|s| s.identity = current);

        match result? {
            Some(identity) => {
                self.switch_to_cloud_mode().await?;
                Ok(Some(identity))
            }
            None => {
                tracing::debug!("sign-in will complete later");
                Ok(None)
            }
        }
    }

    /// Signs out and returns to local mode.
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.inner.identity.sign_out().await?;
        let current = self.inner.identity.current();
        self.inner.update(|s| s.identity = current);

        if self.is_cloud_mode() {
            self.switch_to_local_mode().await?;
        }
        Ok(())
    }

    /// Enters cloud mode, signing in first if needed.
    pub async fn initialize_cloud_sync(&self) -> SyncResult<Option<Identity>> {
        let identity = self.identity_state();
        if !identity.is_authenticated {
            return self.sign_in().await;
        }
        self.switch_to_cloud_mode().await?;
        Ok(identity.identity)
    }

    /// Clears the set from local storage, and from the remote in cloud mode.
    pub async fn clear_all(&self) -> SyncResult<()> {
        if !self.cloud_ready() {
            self.inner
                .local
                .clear()
                .map_err(|e| self.inner.record_local_error(SyncError::local(e)))?;
            self.inner.update(|s| {
                s.records = Arc::new(Vec::new());
                s.sync.has_local_changes = false;
                s.sync.has_remote_changes = false;
            });
            tracing::info!("cleared local data");
            return Ok(());
        }

        let _write = self.inner.track_write(&[]);
        self.inner.begin_cloud_op();
        let local_result = self.inner.local.clear();
        let remote_result = self.inner.remote.clear().await;
        match (local_result, remote_result) {
            (Ok(()), Ok(())) => {}
            (Err(e), _) => return Err(self.inner.fail_cloud_op(SyncError::local(e))),
            (Ok(()), Err(e)) => return Err(self.inner.fail_cloud_op(SyncError::remote(e))),
        }

        tracing::info!("cleared local and cloud data");
        self.inner.update(|s| {
            s.records = Arc::new(Vec::new());
            s.sync.has_local_changes = false;
            s.sync.has_remote_changes = false;
            s.sync.status = SyncStatus::Synced;
            s.pending_conflict = None;
        });
        Ok(())
    }

    /// Serializes the active set, from the remote in cloud mode.
    pub async fn export_data(&self) -> SyncResult<String> {
        if self.cloud_ready() {
            self.inner.remote.export().await.map_err(SyncError::remote)
        } else {
            self.inner.local.export().map_err(SyncError::local)
        }
    }

    /// Imports a JSON array of records and saves them through [`Self::save`].
    ///
    /// Invalid entries are dropped; a payload that is not a JSON array
    /// fails without touching any state.
    pub async fn import_data(&self, json: &str) -> SyncResult<ImportReport> {
        let batch = parse_import(json).map_err(|e| {
            tracing::warn!(error = %e, "rejected import payload");
            SyncError::InvalidPayload(e)
        })?;
        let report = batch.report();

        self.save(batch.records).await?;
        tracing::info!(
            imported = report.imported,
            discarded = report.discarded,
            "imported records"
        );
        Ok(report)
    }

    /// Settles a conflict held under the manual policy.
    pub async fn resolve_conflict(&self, resolution: ConflictResolution) -> SyncResult<()> {
        let Some(conflict) = self.pending_conflict() else {
            return Err(SyncError::NoPendingConflict);
        };

        match resolution {
            ConflictResolution::AcceptRemote => {
                self.inner
                    .local
                    .save(&conflict.remote)
                    .map_err(|e| self.inner.record_local_error(SyncError::local(e)))?;
                tracing::info!(records = conflict.remote.len(), "conflict resolved with remote set");
                self.inner.update(|s| {
                    s.records = Arc::new(conflict.remote);
                    s.sync.has_local_changes = false;
                    s.sync.has_remote_changes = false;
                    s.pending_conflict = None;
                });
            }
            ConflictResolution::KeepLocal => {
                self.require_cloud()?;
                self.inner.begin_cloud_op();
                let records = self.records();
                let _write = self.inner.track_write(&records);
                self.inner
                    .remote
                    .save(&records)
                    .await
                    .map_err(|e| self.inner.fail_cloud_op(SyncError::remote(e)))?;
                let synced_at = self.remote_sync_time().await;

                tracing::info!(records = records.len(), "conflict resolved with local set");
                self.inner.update(|s| {
                    s.sync.has_local_changes = false;
                    s.sync.has_remote_changes = false;
                    s.sync.last_sync_time = synced_at;
                    s.sync.status = SyncStatus::Synced;
                    s.pending_conflict = None;
                    s.stats.cloud_writes += 1;
                });
            }
        }
        Ok(())
    }

    /// Releases every listener, subscription and remote binding.
    ///
    /// Runs exactly once; later calls do nothing.
    pub fn cleanup(&self) {
        if self.inner.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.inner.identity_listener.lock().take() {
            handle.unsubscribe();
        }
        if let Some(task) = self.inner.identity_task.lock().take() {
            task.abort();
        }
        self.inner.subscription.clear_observers();
        self.inner.subscription.stop();
        self.inner.remote.set_identity(None);
        self.inner.update(|s| s.bound_identity = None);
        tracing::info!("sync engine cleaned up");
    }

    /// Returns true once `cleanup` has run.
    pub fn is_cleaned_up(&self) -> bool {
        self.inner.cleaned_up.load(Ordering::SeqCst)
    }
}

impl<L, R, I> std::fmt::Debug for SyncEngine<L, R, I>
where
    R: RemoteStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("SyncEngine")
            .field("mode", &state.mode)
            .field("status", &state.sync.status)
            .field("records", &state.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityProvider;
    use packsync_storage::{InMemoryLocalStore, InMemoryRemoteStore, RemoteHub};

    type TestEngine = SyncEngine<InMemoryLocalStore, InMemoryRemoteStore, InMemoryIdentityProvider>;

    fn alice() -> Identity {
        Identity::new("alice").with_display_name("Alice")
    }

    fn engine_with(identity: InMemoryIdentityProvider, config: SyncConfig) -> (TestEngine, RemoteHub) {
        let hub = RemoteHub::new();
        let engine = SyncEngine::new(config, InMemoryLocalStore::new(), hub.store(), identity);
        (engine, hub)
    }

    fn items(n: i64) -> Vec<Record> {
        (1..=n).map(|i| Record::new(i, format!("item {i}"), i)).collect()
    }

    #[tokio::test]
    async fn local_save_marks_local_changes() {
        let (engine, hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        engine.initialize().await.unwrap();

        engine.save(items(2)).await.unwrap();

        assert_eq!(engine.records().len(), 2);
        let sync = engine.sync_state();
        assert!(sync.has_local_changes);
        assert_eq!(sync.status, SyncStatus::Offline);
        assert!(hub.records("alice").is_empty());
    }

    #[tokio::test]
    async fn local_save_failure_keeps_memory() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        engine.initialize().await.unwrap();
        engine.save(items(1)).await.unwrap();

        engine.local_store().set_fail_writes(true);
        let err = engine.save(items(3)).await.unwrap_err();

        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(engine.records().len(), 1);
        assert!(engine.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        engine.initialize().await.unwrap();
        engine.initialize().await.unwrap();

        assert!(engine.is_initialized());
        assert_eq!(engine.identity_provider().listener_count(), 1);
    }

    #[tokio::test]
    async fn identity_alone_does_not_enter_cloud_mode() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        engine.initialize().await.unwrap();
        tokio::task::yield_now().await;

        assert!(engine.can_sync_to_cloud());
        assert!(!engine.is_cloud_mode());
        assert_eq!(engine.sync_state().status, SyncStatus::Offline);
    }

    #[tokio::test]
    async fn cloud_ops_require_identity() {
        let (engine, hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        engine.initialize().await.unwrap();

        let err = engine.sync_to_cloud().await.unwrap_err();
        assert!(matches!(err, SyncError::Identity(IdentityError::NotAuthenticated)));
        let err = engine.switch_to_cloud_mode().await.unwrap_err();
        assert!(matches!(err, SyncError::Identity(_)));
        assert_eq!(engine.sync_state().status, SyncStatus::Offline);
        assert_eq!(hub.open_feeds(), 0);
    }

    #[tokio::test]
    async fn cloud_ops_require_initialize() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        let err = engine.switch_to_cloud_mode().await.unwrap_err();
        assert!(matches!(err, SyncError::NotInitialized));
    }

    #[tokio::test]
    async fn cloud_save_writes_both_backends() {
        let (engine, hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        engine.initialize().await.unwrap();
        engine.switch_to_cloud_mode().await.unwrap();

        engine.save(items(3)).await.unwrap();

        assert_eq!(hub.records("alice").len(), 3);
        assert_eq!(engine.local_store().load().unwrap().len(), 3);
        let sync = engine.sync_state();
        assert_eq!(sync.status, SyncStatus::Synced);
        assert!(!sync.has_local_changes);
        assert_eq!(
            sync.last_sync_time,
            hub.metadata("alice").map(|m| m.last_updated)
        );
    }

    #[tokio::test]
    async fn watch_sees_status_changes() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        let mut rx = engine.watch();
        engine.initialize().await.unwrap();
        engine.switch_to_cloud_mode().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.mode, SyncMode::CloudActive);
        assert_eq!(snapshot.sync.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn echo_of_write_in_flight_is_in_sync() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        engine.initialize().await.unwrap();
        engine.switch_to_cloud_mode().await.unwrap();

        let outcome = {
            let _write = engine.inner.track_write(&items(2));
            engine.inner.apply_remote(items(2))
        };

        assert_eq!(outcome, Some(ConflictOutcome::InSync));
        assert!(!engine.sync_state().has_remote_changes);
        assert_eq!(engine.stats().conflicts_detected, 0);
        assert!(engine.inner.state.read().pending_writes.is_empty());

        let outcome = engine.inner.apply_remote(items(2));
        assert_eq!(outcome, Some(ConflictOutcome::KeptLocal));
        assert!(engine.sync_state().has_remote_changes);
    }

    #[tokio::test]
    async fn manual_policy_does_not_defer_own_write() {
        let (engine, _hub) = engine_with(
            InMemoryIdentityProvider::signed_in(alice()),
            SyncConfig::new().with_conflict_policy(ConflictPolicy::Manual),
        );
        engine.initialize().await.unwrap();
        engine.switch_to_cloud_mode().await.unwrap();

        let _write = engine.inner.track_write(&items(3));
        engine.inner.apply_remote(items(3));

        assert!(engine.pending_conflict().is_none());
        assert!(!engine.sync_state().has_remote_changes);
    }

    #[tokio::test]
    async fn save_while_identity_loads_stays_local() {
        let (engine, hub) = engine_with(InMemoryIdentityProvider::signed_in(alice()), SyncConfig::default());
        engine.initialize().await.unwrap();
        engine.switch_to_cloud_mode().await.unwrap();

        engine.identity_provider().emit(IdentityState::loading());
        tokio::task::yield_now().await;
        engine.save(items(2)).await.unwrap();

        assert!(engine.is_cloud_mode());
        assert!(hub.records("alice").is_empty());
        let sync = engine.sync_state();
        assert!(sync.has_local_changes);
        assert_eq!(sync.status, SyncStatus::Synced);

        engine.identity_provider().emit(IdentityState::signed_in(alice()));
        tokio::task::yield_now().await;
        engine.sync_to_cloud().await.unwrap();

        assert_eq!(hub.records("alice").len(), 2);
        assert!(!engine.sync_state().has_local_changes);
    }

    #[tokio::test]
    async fn conflict_policy_can_change() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        assert_eq!(engine.conflict_policy(), ConflictPolicy::Local);
        engine.set_conflict_policy(ConflictPolicy::Manual);
        assert_eq!(engine.conflict_policy(), ConflictPolicy::Manual);
    }

    #[tokio::test]
    async fn resolve_without_conflict_fails() {
        let (engine, _hub) = engine_with(InMemoryIdentityProvider::signed_out(), SyncConfig::default());
        let err = engine
            .resolve_conflict(ConflictResolution::AcceptRemote)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoPendingConflict));
    }
}
