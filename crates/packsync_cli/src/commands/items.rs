//! Checklist editing commands.

use super::{open_engine, CliError, CliResult};
use chrono::Utc;
use packsync_model::Record;
use std::path::Path;

/// Prints the checklist.
pub async fn list(path: &Path, format: &str) -> CliResult<()> {
    let engine = open_engine(path).await?;
    let records = engine.records();

    match format {
        "json" => {
            let serialized: Vec<_> = records.iter().map(Record::serialize).collect();
            println!("{}", serde_json::to_string_pretty(&serialized)?);
        }
        _ => {
            if records.is_empty() {
                println!("(empty)");
            }
            for record in &records {
                let mark = if record.done { "x" } else { " " };
                println!("[{mark}] {:>14}  {}", record.id, record.text);
            }
        }
    }
    engine.cleanup();
    Ok(())
}

/// Appends an item.
pub async fn add(path: &Path, text: &str) -> CliResult<()> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CliError::Usage("item text must not be empty".into()));
    }

    let engine = open_engine(path).await?;
    let mut records = engine.records();
    let record = next_record(&records, text);
    println!("added {}", record.id);
    records.push(record);

    engine.save(records).await?;
    engine.cleanup();
    Ok(())
}

/// Flips the packed flag of an item.
pub async fn toggle(path: &Path, id: i64) -> CliResult<()> {
    let engine = open_engine(path).await?;
    let mut records = engine.records();
    let record = records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or(CliError::NotFound(id))?;
    record.done = !record.done;
    println!("{} {}", if record.done { "packed" } else { "unpacked" }, record.text);

    engine.save(records).await?;
    engine.cleanup();
    Ok(())
}

/// Removes an item.
pub async fn remove(path: &Path, id: i64) -> CliResult<()> {
    let engine = open_engine(path).await?;
    let mut records = engine.records();
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
        return Err(CliError::NotFound(id));
    }

    engine.save(records).await?;
    engine.cleanup();
    Ok(())
}

/// Removes every item.
pub async fn clear(path: &Path) -> CliResult<()> {
    let engine = open_engine(path).await?;
    engine.clear_all().await?;
    engine.cleanup();
    Ok(())
}

/// Builds the record appended after `existing`.
///
/// Ids are millisecond timestamps, bumped past the current maximum so
/// they stay unique when items are added faster than the clock ticks.
fn next_record(existing: &[Record], text: &str) -> Record {
    let max_id = existing.iter().map(|r| r.id).max().unwrap_or(0);
    let max_order = existing.iter().map(|r| r.order).max().unwrap_or(0);
    let id = Utc::now().timestamp_millis().max(max_id.saturating_add(1));
    Record::new(id, text, max_order.saturating_add(1))
}
