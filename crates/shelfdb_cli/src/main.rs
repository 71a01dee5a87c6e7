//! ShelfDB CLI
//!
//! Command-line maintenance tools for ShelfDB collection directories.
//!
//! # Commands
//!
//! - `inspect` - Display collection metadata and shard sizes
//! - `verify` - Verify collection integrity

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShelfDB command-line collection tools.
#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the collection directory
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
    /// Display collection metadata and shard sizes
    Inspect {
        /// Show per-shard details
        #[arg(short, long)]
        shards: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify collection integrity
    Verify,

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

    match cli.command {
        Commands::Inspect { shards, format } => {
            let path = cli.path.ok_or("Collection path required for inspect")?;
            commands::inspect::run(&path, shards, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Collection path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("ShelfDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ShelfDB Core v{}", shelfdb_core::VERSION);
        }
    }

    Ok(())
}
