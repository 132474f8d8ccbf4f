//! CoveDB CLI
//!
//! Command-line tools for CoveDB store files.
//!
//! # Commands
//!
//! - `inspect` - Display store header, schema, and row counts
//! - `verify` - Check store file integrity
//! - `delete` - Delete a store file
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CoveDB command-line store tools.
#[derive(Parser)]
#[command(name = "covedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store header, schema, and row counts
    Inspect {
        /// Path to the store file
        path: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check store file integrity
    Verify {
        /// Path to the store file
        path: PathBuf,
    },

    /// Delete a store file
    Delete {
        /// Path to the store file
        path: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so command output stays parseable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { path, format } => {
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { path } => {
            commands::verify::run(&path)?;
        }
        Commands::Delete { path, force } => {
            commands::delete::run(&path, force)?;
        }
        Commands::Version => {
            println!("CoveDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CoveDB Core v{}", covedb_core::VERSION);
        }
    }

    Ok(())
}
