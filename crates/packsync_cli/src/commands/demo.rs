//! Two-device sync demonstration against an in-memory cloud.

use super::CliResult;
use packsync_model::{Identity, Record};
use packsync_storage::{InMemoryLocalStore, InMemoryRemoteStore, RemoteHub};
use packsync_sync_engine::{
    ConflictOutcome, ConflictPolicy, ConflictResolution, InMemoryIdentityProvider, SyncConfig,
    SyncEngine,
};
use std::time::Duration;

type DemoEngine = SyncEngine<InMemoryLocalStore, InMemoryRemoteStore, InMemoryIdentityProvider>;

fn device(hub: &RemoteHub, config: SyncConfig) -> DemoEngine {
    let identity = Identity::new("demo").with_display_name("Demo Traveller");
    SyncEngine::new(
        config,
        InMemoryLocalStore::new(),
        hub.store(),
        InMemoryIdentityProvider::signed_in(identity),
    )
}

fn describe(outcome: &ConflictOutcome) -> &'static str {
    match outcome {
        ConflictOutcome::InSync => "already in sync",
        ConflictOutcome::KeptLocal => "kept local, remote changes flagged",
        ConflictOutcome::AcceptedRemote(_) => "accepted remote set",
        ConflictOutcome::Deferred(_) => "held for manual resolution",
    }
}

fn print_items(name: &str, engine: &DemoEngine) {
    let state = engine.sync_state();
    println!(
        "{name}: {} item(s), status {}, remote changes pending: {}",
        engine.records().len(),
        state.status,
        state.has_remote_changes
    );
    for record in engine.records() {
        println!("  - {}", record.text);
    }
}

/// Runs the demo with the laptop using `policy`.
pub async fn run(policy: ConflictPolicy) -> CliResult<()> {
    let hub = RemoteHub::new();
    let phone = device(&hub, SyncConfig::default());
    let laptop = device(&hub, SyncConfig::new().with_conflict_policy(policy));

    let _handle = laptop.on_remote_change(|change| {
        println!(
            "laptop: remote change with {} item(s), {}",
            change.records.len(),
            describe(&change.outcome)
        );
    });

    for engine in [&phone, &laptop] {
        engine.initialize().await?;
        engine.switch_to_cloud_mode().await?;
    }
    println!("both devices in cloud mode (laptop policy: {policy})");

    phone
        .save(vec![
            Record::new(1, "Passport", 1),
            Record::new(2, "Charger", 2),
        ])
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    print_items("laptop", &laptop);

    if laptop.pending_conflict().is_some() {
        println!("laptop: accepting remote set");
        laptop.resolve_conflict(ConflictResolution::AcceptRemote).await?;
    } else if laptop.sync_state().has_remote_changes {
        println!("laptop: pulling from cloud");
        laptop.sync_from_cloud().await?;
    }

    print_items("phone", &phone);
    print_items("laptop", &laptop);

    phone.cleanup();
    laptop.cleanup();
    Ok(())
}
