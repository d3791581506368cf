//! Info command implementation.

use super::{open_engine, CliResult};
use serde::Serialize;
use std::path::Path;

/// Checklist statistics.
#[derive(Debug, Serialize)]
pub struct InfoResult {
    /// Data directory.
    pub path: String,
    /// Number of items.
    pub item_count: usize,
    /// Number of packed items.
    pub packed_count: usize,
    /// Size of the stored checklist in bytes.
    pub size_bytes: u64,
    /// Sync mode.
    pub mode: String,
    /// Sync status.
    pub status: String,
}

/// Runs the info command.
pub async fn run(path: &Path, format: &str) -> CliResult<()> {
    let engine = open_engine(path).await?;
    let records = engine.records();

    let result = InfoResult {
        path: path.display().to_string(),
        item_count: records.len(),
        packed_count: records.iter().filter(|r| r.done).count(),
        size_bytes: engine.local_size_bytes(),
        mode: engine.mode().to_string(),
        status: engine.sync_state().status.to_string(),
    };
    engine.cleanup();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InfoResult) {
    println!("Checklist: {}", result.path);
    println!("  Items:  {} ({} packed)", result.item_count, result.packed_count);
    println!("  Size:   {} bytes", result.size_bytes);
    println!("  Mode:   {}", result.mode);
    println!("  Status: {}", result.status);
}
