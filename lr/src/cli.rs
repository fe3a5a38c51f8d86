//! Command-line interface for the `lr` binary

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bucket::Bucket;

/// linkrelay - relay an activity stream with shortened links expanded
#[derive(Debug, Parser)]
#[command(
    name = "lr",
    about = "Relay an activity stream, expanding shortened links before republishing",
    version = env!("GIT_DESCRIBE"),
    args_override_self = true,
)]
pub struct Cli {
    /// What to do (defaults to start)
    #[arg(value_enum, value_name = "MODE")]
    pub mode: Option<Mode>,

    /// Resume after this bucket instead of the saved checkpoint
    #[arg(long, value_name = "YYYYMMDDHHMM")]
    pub timestamp: Option<Bucket>,

    /// Detach and run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Seconds to wait before polling again when caught up
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory holding the log, lock, state and cache files
    #[arg(long, value_name = "DIR")]
    pub basedir: Option<PathBuf>,

    /// Log verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Info)]
    pub verbosity: Verbosity,

    /// Path to config file (defaults to <basedir>/config.yml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Provider username
    #[arg(long)]
    pub username: Option<String>,

    /// Provider password
    #[arg(long)]
    pub password: Option<String>,

    /// Only relay activities matching this keyword
    #[arg(long)]
    pub keyword: Option<String>,

    /// Cap on activities processed per bucket
    #[arg(long, value_name = "N")]
    pub max_activities: Option<usize>,

    /// Expansion workers per bucket
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    /// Base directory, `~/.linkrelay` unless overridden
    pub fn base_dir(&self) -> PathBuf {
        match &self.basedir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".linkrelay"),
        }
    }

    /// Arguments for a detached child: foreground start with absolute paths
    pub fn forward_args(&self, base_dir: &Path, config: Option<&Path>) -> Vec<String> {
        debug!(?base_dir, ?config, "Cli::forward_args: called");
        let mut args = vec![
            "start".to_string(),
            "--basedir".to_string(),
            base_dir.display().to_string(),
        ];
        if let Some(value) = self.verbosity.to_possible_value() {
            args.extend(["--verbosity".to_string(), value.get_name().to_string()]);
        }
        if let Some(config) = config {
            args.extend(["--config".to_string(), config.display().to_string()]);
        }
        if let Some(timestamp) = self.timestamp {
            args.extend(["--timestamp".to_string(), timestamp.to_string()]);
        }
        if let Some(timeout) = self.timeout {
            args.extend(["--timeout".to_string(), timeout.to_string()]);
        }
        if let Some(username) = &self.username {
            args.extend(["--username".to_string(), username.clone()]);
        }
        if let Some(password) = &self.password {
            args.extend(["--password".to_string(), password.clone()]);
        }
        if let Some(keyword) = &self.keyword {
            args.extend(["--keyword".to_string(), keyword.clone()]);
        }
        if let Some(limit) = self.max_activities {
            args.extend(["--max-activities".to_string(), limit.to_string()]);
        }
        if let Some(concurrency) = self.concurrency {
            args.extend(["--concurrency".to_string(), concurrency.to_string()]);
        }
        args
    }
}

/// Supervisor modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    #[default]
    Start,
    Stop,
    Restart,
    Pid,
}

/// `--verbosity` levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Verbosity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Verbosity {
    /// Tracing level; there is no level above error, so fatal shares it
    pub fn level(self) -> tracing::Level {
        debug!(?self, "Verbosity::level: called");
        match self {
            Verbosity::Debug => tracing::Level::DEBUG,
            Verbosity::Info => tracing::Level::INFO,
            Verbosity::Warn => tracing::Level::WARN,
            Verbosity::Error | Verbosity::Fatal => tracing::Level::ERROR,
        }
    }
}
