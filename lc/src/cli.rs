//! CLI argument parsing for the cache inspection tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lc")]
#[command(author, version, about = "Inspect persisted LRU cache files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List entries, least recently used first
    List {
        /// Cache file to read
        #[arg(required = true)]
        file: PathBuf,

        /// Show only the N most recent entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Look up one key
    Get {
        /// Cache file to read
        #[arg(required = true)]
        file: PathBuf,

        /// Key to look up
        #[arg(required = true)]
        key: String,
    },

    /// Show summary statistics
    Stats {
        /// Cache file to read
        #[arg(required = true)]
        file: PathBuf,
    },
}
