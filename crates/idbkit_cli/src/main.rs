//! idbkit CLI
//!
//! Command-line tools for durable idbkit engine files.
//!
//! # Commands
//!
//! - `inspect` - List databases, stores and indexes with their sizes
//! - `dump` - Print the records of one object store
//! - `verify` - Check that every index matches its store's records
//! - `compact` - Rewrite the log as a single snapshot

mod commands;
mod json;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// idbkit command-line tools.
#[derive(Parser)]
#[command(name = "idbkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases, object stores and indexes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of an object store as JSON lines
    Dump {
        /// Database name
        database: String,

        /// Object store name
        store: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Check that index entries match the records they were built from
    Verify {
        /// Only check this database
        #[arg(short, long)]
        database: Option<String>,
    },

    /// Rewrite the log as a single snapshot
    Compact {
        /// Report the current size without rewriting
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            database,
            store,
            limit,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, &database, &store, limit)?;
        }
        Commands::Verify { database } => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path, database.as_deref())?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Log path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("idbkit CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
