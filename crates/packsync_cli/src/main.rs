//! packsync CLI
//!
//! Command-line tools for a local packing checklist.
//!
//! # Commands
//!
//! - `list` - Show the checklist
//! - `add` / `toggle` / `remove` / `clear` - Edit the checklist
//! - `export` / `import` - Move the checklist as JSON
//! - `info` - Display storage statistics
//! - `demo-sync` - Run two simulated devices against an in-memory cloud

mod commands;

use clap::{Parser, Subcommand};
use packsync_sync_engine::ConflictPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// packsync command-line checklist tools.
#[derive(Parser)]
#[command(name = "packsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the checklist data
    #[arg(global = true, short, long, default_value = ".packsync")]
    path: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the checklist
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Add an item at the end of the checklist
    Add {
        /// Item text
        text: String,
    },

    /// Flip an item between packed and unpacked
    Toggle {
        /// Item id
        id: i64,
    },

    /// Remove an item
    Remove {
        /// Item id
        id: i64,
    },

    /// Remove every item
    Clear,

    /// Write the checklist as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the checklist with items from a JSON file
    Import {
        /// Input file
        file: PathBuf,
    },

    /// Display storage statistics
    Info {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run two simulated devices against an in-memory cloud
    DemoSync {
        /// Conflict policy of the second device (local, remote, manual)
        #[arg(long, default_value = "local")]
        policy: ConflictPolicy,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::List { format } => commands::items::list(&cli.path, &format).await?,
        Commands::Add { text } => commands::items::add(&cli.path, &text).await?,
        Commands::Toggle { id } => commands::items::toggle(&cli.path, id).await?,
        Commands::Remove { id } => commands::items::remove(&cli.path, id).await?,
        Commands::Clear => commands::items::clear(&cli.path).await?,
        Commands::Export { output } => commands::transfer::export(&cli.path, output.as_deref()).await?,
        Commands::Import { file } => commands::transfer::import(&cli.path, &file).await?,
        Commands::Info { format } => commands::info::run(&cli.path, &format).await?,
        Commands::DemoSync { policy } => commands::demo::run(policy).await?,
        Commands::Version => {
            println!("packsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
