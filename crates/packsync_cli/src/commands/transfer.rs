//! Export and import commands.

use super::{open_engine, CliResult};
use std::fs;
use std::path::Path;

/// Writes the checklist as JSON to `output` or stdout.
pub async fn export(path: &Path, output: Option<&Path>) -> CliResult<()> {
    let engine = open_engine(path).await?;
    let json = engine.export_data().await?;
    engine.cleanup();

    match output {
        Some(file) => {
            fs::write(file, json)?;
            tracing::info!(file = %file.display(), "exported checklist");
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Replaces the checklist with the valid entries of a JSON file.
pub async fn import(path: &Path, file: &Path) -> CliResult<()> {
    let payload = fs::read_to_string(file)?;
    let engine = open_engine(path).await?;
    let report = engine.import_data(&payload).await?;
    engine.cleanup();

    println!(
        "imported {} item(s), skipped {} invalid",
        report.imported, report.discarded
    );
    Ok(())
}
