//! CLI command implementations.

pub mod demo;
pub mod info;
pub mod items;
pub mod transfer;

use packsync_storage::{FileLocalStore, InMemoryRemoteStore, StorageError};
use packsync_sync_engine::{InMemoryIdentityProvider, SyncConfig, SyncEngine, SyncError};
use std::path::Path;
use thiserror::Error;

/// Engine used by the file-backed commands: local mode only.
pub type LocalEngine = SyncEngine<FileLocalStore, InMemoryRemoteStore, InMemoryIdentityProvider>;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// No item with this id.
    #[error("no item with id {0}")]
    NotFound(i64),

    /// Sync engine failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage failure while opening the data directory.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Opens the checklist stored under `path` and loads it.
pub async fn open_engine(path: &Path) -> CliResult<LocalEngine> {
    let local = FileLocalStore::open(path)?;
    tracing::debug!(path = %local.path().display(), "opened checklist");

    let engine = SyncEngine::new(
        SyncConfig::default(),
        local,
        InMemoryRemoteStore::new(),
        InMemoryIdentityProvider::signed_out(),
    );
    engine.initialize().await?;
    Ok(engine)
}
