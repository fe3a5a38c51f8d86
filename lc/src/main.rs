use std::collections::HashSet;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use lrucache::cli::{Cli, Command};
use lrucache::persist;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("lc starting");

    match cli.command {
        Command::List { file, limit } => {
            let entries: Vec<(String, String)> =
                persist::load(&file).context(format!("Failed to read {}", file.display()))?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for (key, value) in entries.iter().skip(skip) {
                println!("{} {} {}", key.yellow(), "->".dimmed(), value);
            }
        }
        Command::Get { file, key } => {
            let entries: Vec<(String, String)> =
                persist::load(&file).context(format!("Failed to read {}", file.display()))?;
            match entries.iter().rev().find(|(k, _)| *k == key) {
                Some((_, value)) => println!("{}", value),
                None => eyre::bail!("Key not found: {}", key),
            }
        }
        Command::Stats { file } => {
            let entries: Vec<(String, String)> =
                persist::load(&file).context(format!("Failed to read {}", file.display()))?;
            let distinct: HashSet<&str> = entries.iter().map(|(_, v)| v.as_str()).collect();
            println!("Cache: {}", file.display().to_string().cyan());
            println!("  Entries: {}", entries.len());
            println!("  Distinct values: {}", distinct.len());
            if let (Some((oldest, _)), Some((newest, _))) = (entries.first(), entries.last()) {
                println!("  Oldest: {}", oldest);
                println!("  Newest: {}", newest);
            }
        }
    }

    Ok(())
}
