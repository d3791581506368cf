//! Engine behavior when remote calls suspend and the change feed runs in
//! the middle of the engine's own writes.

use packsync_model::SyncStatus;
use packsync_storage::{InMemoryLocalStore, LocalStore, RemoteHub};
use packsync_sync_engine::{ConflictPolicy, InMemoryIdentityProvider, SyncConfig, SyncEngine};
use packsync_testkit::prelude::*;
use std::time::Duration;

fn delayed_device(hub: &RemoteHub, id: &str) -> Device<PausingRemote> {
    let engine = SyncEngine::new(
        SyncConfig::default(),
        InMemoryLocalStore::new(),
        PausingRemote::new(hub.store()).with_delay(Duration::from_millis(2)),
        InMemoryIdentityProvider::signed_in(identity(id)),
    );
    Device {
        engine,
        hub: hub.clone(),
    }
}

fn assert_clean(device: &Device<PausingRemote>) {
    let sync = device.engine.sync_state();
    assert_eq!(sync.status, SyncStatus::Synced);
    assert!(!sync.has_remote_changes);
    assert_eq!(device.engine.stats().conflicts_detected, 0);
    assert!(device.engine.pending_conflict().is_none());
}

#[tokio::test]
async fn own_save_is_not_a_remote_change() {
    let device = Device::pausing(&RemoteHub::new(), "alice", SyncConfig::default());
    device.go_cloud().await;

    device.engine.save(packing_list()).await.unwrap();
    wait_for_deliveries(&device.engine, 1).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), packing_list());
    assert_eq!(device.hub.records("alice"), packing_list());
}

#[tokio::test]
async fn own_save_is_not_deferred_under_manual_policy() {
    let config = SyncConfig::new().with_conflict_policy(ConflictPolicy::Manual);
    let device = Device::pausing(&RemoteHub::new(), "alice", config);
    device.go_cloud().await;

    device.engine.save(packing_list()).await.unwrap();
    device.engine.save(numbered_records(2)).await.unwrap();
    wait_for_deliveries(&device.engine, 2).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), numbered_records(2));
}

#[tokio::test]
async fn seeding_the_remote_is_not_a_remote_change() {
    let device = Device::pausing(&RemoteHub::new(), "alice", SyncConfig::default());
    device.engine.initialize().await.unwrap();
    device.local().save(&numbered_records(2)).unwrap();

    device.engine.switch_to_cloud_mode().await.unwrap();
    wait_for_deliveries(&device.engine, 1).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), numbered_records(2));
    assert_eq!(device.hub.records("alice"), numbered_records(2));
}

#[tokio::test]
async fn push_of_local_set_is_not_a_remote_change() {
    let device = Device::pausing(&RemoteHub::new(), "alice", SyncConfig::default());
    device.go_cloud().await;
    device.engine.save(packing_list()).await.unwrap();
    device.local().save(&numbered_records(2)).unwrap();

    device.engine.sync_to_cloud().await.unwrap();
    wait_for_deliveries(&device.engine, 2).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), numbered_records(2));
}

#[tokio::test]
async fn clear_all_is_not_a_remote_change() {
    let device = Device::pausing(&RemoteHub::new(), "alice", SyncConfig::default());
    device.go_cloud().await;
    device.engine.save(packing_list()).await.unwrap();

    device.engine.clear_all().await.unwrap();
    wait_for_deliveries(&device.engine, 2).await;

    assert_clean(&device);
    assert!(device.engine.records().is_empty());
}

#[tokio::test]
async fn other_device_write_is_still_flagged() {
    let device = Device::pausing(&RemoteHub::new(), "alice", SyncConfig::default());
    device.go_cloud().await;
    device.engine.save(packing_list()).await.unwrap();
    wait_for_deliveries(&device.engine, 1).await;

    let other = device.sibling("alice", SyncConfig::default());
    other.go_cloud().await;
    other.engine.save(numbered_records(2)).await.unwrap();

    let snapshot = wait_for(&device.engine, |s| s.sync.has_remote_changes).await;
    assert_eq!(*snapshot.records, packing_list());
    assert_eq!(device.engine.stats().conflicts_detected, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn own_save_is_not_a_remote_change_across_threads() {
    let device = delayed_device(&RemoteHub::new(), "alice");
    device.go_cloud().await;

    for n in 1..=4 {
        device.engine.save(numbered_records(n)).await.unwrap();
    }
    wait_for_deliveries(&device.engine, 4).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), numbered_records(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_and_seed_across_threads() {
    let hub = RemoteHub::new();
    let device = delayed_device(&hub, "alice");
    device.engine.initialize().await.unwrap();
    device.local().save(&packing_list()).unwrap();

    device.engine.switch_to_cloud_mode().await.unwrap();
    device.local().save(&numbered_records(3)).unwrap();
    device.engine.sync_to_cloud().await.unwrap();
    wait_for_deliveries(&device.engine, 2).await;

    assert_clean(&device);
    assert_eq!(device.engine.records(), numbered_records(3));
    assert_eq!(hub.records("alice"), numbered_records(3));
}
