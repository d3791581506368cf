//! Test fixtures and engine helpers.
//!
//! Provides record builders with fixed timestamps and engine harnesses
//! that simulate one or more devices sharing a [`RemoteHub`].

use chrono::{DateTime, TimeZone, Utc};
use packsync_model::{Identity, Record};
use crate::remote::PausingRemote;
use packsync_storage::{
    FileLocalStore, InMemoryLocalStore, InMemoryRemoteStore, RemoteHub, RemoteStore,
};
use packsync_sync_engine::{EngineSnapshot, InMemoryIdentityProvider, SyncConfig, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Engine over in-memory backends and the given remote.
pub type DeviceEngine<R> = SyncEngine<InMemoryLocalStore, R, InMemoryIdentityProvider>;

/// Engine over in-memory backends.
pub type TestEngine = DeviceEngine<InMemoryRemoteStore>;

/// Engine whose remote calls suspend, see [`PausingRemote`].
pub type PausingEngine = DeviceEngine<PausingRemote>;

/// Timestamp shared by every fixture record.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Builds a record with the fixture timestamp.
pub fn record(id: i64, text: &str, order: i64) -> Record {
    Record::new(id, text, order).with_created_at(fixed_time())
}

/// A small packing list sorted by order.
pub fn packing_list() -> Vec<Record> {
    vec![
        record(1, "Passport", 1),
        record(2, "Charger", 2).with_done(true),
        record(3, "Toothbrush", 3),
    ]
}

/// `n` records with ids and orders `1..=n`.
pub fn numbered_records(n: i64) -> Vec<Record> {
    (1..=n).map(|i| record(i, &format!("item {i}"), i)).collect()
}

/// A test identity.
pub fn identity(id: &str) -> Identity {
    Identity::new(id)
        .with_display_name(id.to_uppercase())
        .with_email(format!("{id}@example.com"))
}

/// One simulated device: an engine plus handles onto its backends.
pub struct Device<R = InMemoryRemoteStore>
where
    R: RemoteStore,
{
    /// The engine under test.
    pub engine: DeviceEngine<R>,
    /// The hub this device's remote store talks to.
    pub hub: RemoteHub,
}

impl Device {
    /// A device with nobody signed in, on a private hub.
    pub fn local_only() -> Self {
        Self::on_hub(&RemoteHub::new(), InMemoryIdentityProvider::signed_out(), SyncConfig::default())
    }

    /// A device signed in as `id`, on a private hub, still in local mode.
    pub fn signed_in(id: &str) -> Self {
        Self::on_hub(
            &RemoteHub::new(),
            InMemoryIdentityProvider::signed_in(identity(id)),
            SyncConfig::default(),
        )
    }

    /// A device on `hub` with the given provider and configuration.
    pub fn on_hub(hub: &RemoteHub, provider: InMemoryIdentityProvider, config: SyncConfig) -> Self {
        let engine = SyncEngine::new(config, InMemoryLocalStore::new(), hub.store(), provider);
        Self {
            engine,
            hub: hub.clone(),
        }
    }
}

impl Device<PausingRemote> {
    /// A device signed in as `id` whose remote calls suspend.
    pub fn pausing(hub: &RemoteHub, id: &str, config: SyncConfig) -> Self {
        let engine = SyncEngine::new(
            config,
            InMemoryLocalStore::new(),
            PausingRemote::new(hub.store()),
            InMemoryIdentityProvider::signed_in(identity(id)),
        );
        Self {
            engine,
            hub: hub.clone(),
        }
    }
}

impl<R: RemoteStore + 'static> Device<R> {
    /// A second device signed in as `id` on the same hub.
    pub fn sibling(&self, id: &str, config: SyncConfig) -> Device {
        Device::on_hub(&self.hub, InMemoryIdentityProvider::signed_in(identity(id)), config)
    }

    /// Initializes the engine and enters cloud mode.
    pub async fn go_cloud(&self) {
        self.engine.initialize().await.expect("initialize");
        self.engine
            .switch_to_cloud_mode()
            .await
            .expect("switch to cloud mode");
    }

    /// Returns the identity provider.
    pub fn provider(&self) -> &Arc<InMemoryIdentityProvider> {
        self.engine.identity_provider()
    }

    /// Returns the local store.
    pub fn local(&self) -> &Arc<InMemoryLocalStore> {
        self.engine.local_store()
    }
}

/// Yields to the runtime so spawned tasks can drain their queues.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Waits until the engine's published state satisfies `predicate`.
///
/// # Panics
///
/// Panics if the condition is not reached within two seconds.
pub async fn wait_for<R>(
    engine: &DeviceEngine<R>,
    predicate: impl Fn(&EngineSnapshot) -> bool,
) -> EngineSnapshot
where
    R: RemoteStore + 'static,
{
    let mut rx = engine.watch();
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            if rx.changed().await.is_err() {
                return engine.snapshot();
            }
        }
    })
    .await;
    reached.expect("engine did not reach the expected state")
}

/// Waits until the engine has been handed `count` remote deltas in total.
///
/// # Panics
///
/// Panics if they do not arrive within two seconds.
pub async fn wait_for_deliveries<R>(engine: &DeviceEngine<R>, count: u64)
where
    R: RemoteStore + 'static,
{
    let delivered = tokio::time::timeout(Duration::from_secs(2), async {
        while engine.stats().remote_changes_received < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    delivered.expect("remote changes were not delivered");
}

/// Runs a test against a file-backed local store in a temporary directory.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&FileLocalStore) -> R,
{
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = FileLocalStore::open(dir.path()).expect("Failed to open file store");
    f(&store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packsync_storage::LocalStore;

    #[test]
    fn fixtures_are_deterministic() {
        assert_eq!(packing_list(), packing_list());
        assert_eq!(numbered_records(4).len(), 4);
        assert_eq!(identity("alice").email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn temp_store_round_trip() {
        with_temp_store(|store| {
            store.save(&packing_list()).unwrap();
            assert_eq!(store.load().unwrap(), packing_list());
        });
    }

    #[tokio::test]
    async fn siblings_share_a_hub() {
        let first = Device::signed_in("alice");
        let second = first.sibling("alice", SyncConfig::default());
        first.go_cloud().await;
        second.go_cloud().await;

        first.engine.save(packing_list()).await.unwrap();
        assert_eq!(second.hub.records("alice").len(), 3);
    }
}
