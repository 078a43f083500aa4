//! txdb CLI
//!
//! Command-line tools for transaction store maintenance. Every command
//! except `version` needs a store directory that no other process has open.
//!
//! # Commands
//!
//! - `inspect` - Display counters, checkpoint and log statistics
//! - `verify` - Walk the log and report the first corruption
//! - `keys` - List stored transaction identifiers
//! - `compact` - Rewrite the log to hold only live data
//! - `clear` - Remove every stored transaction

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Transaction store command-line tools.
#[derive(Parser)]
#[command(name = "txdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Display store statistics and the checkpoint reference
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity
    Verify,

    /// List stored transaction identifiers
    Keys {
        /// Maximum number of identifiers to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Compact the log to reclaim space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Remove every stored transaction
    Clear,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(command = ?cli.command, path = ?cli.path, "running command");

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Keys { limit } => {
            let path = cli.path.ok_or("Store path required for keys")?;
            commands::keys::run(&path, limit)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Clear => {
            let path = cli.path.ok_or("Store path required for clear")?;
            commands::clear::run(&path)?;
        }
        Commands::Version => {
            println!("txdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txdb core v{}", txdb_core::VERSION);
        }
    }

    Ok(())
}
