//! tidesync CLI
//!
//! Command-line tools for the job records a sync manager persists in a
//! file store directory. The store must not be open in another process.
//!
//! # Commands
//!
//! - `list` - List job records, optionally filtered by status
//! - `show` - Display one job record
//! - `delete` - Delete a job record
//! - `recover` - Mark jobs interrupted while RUNNING as STOPPED
//! - `collections` - Display the collections of the store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tidesync_engine::{SyncStatus, DEFAULT_SYNCS_COLLECTION};
use tracing_subscriber::EnvFilter;

/// Inspect and maintain tidesync job records.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Collection holding the job records
    #[arg(global = true, long, default_value = DEFAULT_SYNCS_COLLECTION)]
    syncs_collection: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List job records
    List {
        /// Only list jobs with this status (new, running, done, failed, stopped)
        #[arg(short, long, value_parser = commands::parse_status)]
        status: Option<SyncStatus>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display one job record
    Show {
        /// Job id or name (prefix with id: or name: to disambiguate)
        job: String,
    },

    /// Delete a job record
    Delete {
        /// Job id or name (prefix with id: or name: to disambiguate)
        job: String,
    },

    /// Mark jobs interrupted while RUNNING as STOPPED
    Recover,

    /// Display the collections of the store
    Collections {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let syncs = cli.syncs_collection.as_str();
    match cli.command {
        Commands::List { status, format } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::list::run(&path, syncs, status, &format)?;
        }
        Commands::Show { job } => {
            let path = cli.path.ok_or("Store path required for show")?;
            commands::show::run(&path, syncs, &job)?;
        }
        Commands::Delete { job } => {
            let path = cli.path.ok_or("Store path required for delete")?;
            commands::delete::run(&path, syncs, &job)?;
        }
        Commands::Recover => {
            let path = cli.path.ok_or("Store path required for recover")?;
            commands::recover::run(&path, syncs)?;
        }
        Commands::Collections { format } => {
            let path = cli.path.ok_or("Store path required for collections")?;
            commands::collections::run(&path, &format)?;
        }
        Commands::Version => {
            println!("tidesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
