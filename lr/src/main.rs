//! linkrelay - activity stream relay with link expansion
//!
//! CLI entry point: supervisor modes, logging, and the signal loop.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info};

use linkrelay::cli::{Cli, Mode, Verbosity};
use linkrelay::config::Config;
use linkrelay::cursor::BucketCursor;
use linkrelay::daemon::{
    DETACHED_ENV, Daemon, InstanceLock, LOCK_ATTEMPTS, LOCK_RETRY_INTERVAL, LockError, Paths, StopOutcome, exit_code,
};
use linkrelay::expand::create_chain;
use linkrelay::publish::HttpPublisher;
use linkrelay::relay::{Relay, RelayOptions};
use linkrelay::source::{ActivitySource, HttpSource};
use linkrelay::state::StateStore;

fn setup_logging(log_file: &Path, verbosity: Verbosity) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let level = verbosity.level();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .context(format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            exit_code::FAILURE
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let base_dir = std::path::absolute(cli.base_dir()).context("Failed to resolve base directory")?;
    let daemon = Daemon::new(Paths::new(&base_dir));

    match cli.mode() {
        Mode::Pid => Ok(cmd_pid(&daemon)),
        Mode::Stop => cmd_stop(&daemon, cli),
        Mode::Restart => {
            let code = cmd_stop(&daemon, cli)?;
            if code != exit_code::OK {
                return Ok(code);
            }
            cmd_start(&daemon, cli)
        }
        Mode::Start => cmd_start(&daemon, cli),
    }
}

fn cmd_pid(daemon: &Daemon) -> i32 {
    match daemon.running_pid() {
        Some(pid) => {
            println!("{}", pid);
            exit_code::OK
        }
        None => {
            eprintln!("linkrelay is not running");
            exit_code::FAILURE
        }
    }
}

fn cmd_stop(daemon: &Daemon, cli: &Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_ref(), &daemon.paths().base_dir)?;
    let interval = Duration::from_millis(config.relay.stop_interval_ms);

    match daemon.stop(config.relay.stop_attempts, interval)? {
        StopOutcome::NotRunning => {
            println!("linkrelay is not running");
            Ok(exit_code::OK)
        }
        StopOutcome::Stopped(pid) => {
            println!("{} (PID: {})", "linkrelay stopped".green(), pid);
            Ok(exit_code::OK)
        }
        StopOutcome::StillRunning(pid) => {
            eprintln!("{} (PID: {})", "linkrelay did not stop".red(), pid);
            Ok(exit_code::STOP_FAILED)
        }
    }
}

fn load_config(cli: &Cli, base_dir: &Path) -> Result<Config> {
    let mut config = Config::load(cli.config.as_ref(), base_dir).context("Failed to load configuration")?;
    config.apply_overrides(cli);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn already_running(daemon: &Daemon) -> i32 {
    let pid = StateStore::new(&daemon.paths().state_file).recorded_pid();
    match pid {
        Some(pid) => eprintln!("linkrelay already running (PID: {})", pid),
        None => eprintln!("linkrelay already running"),
    }
    exit_code::ALREADY_RUNNING
}

fn cmd_start(daemon: &Daemon, cli: &Cli) -> Result<i32> {
    daemon.ensure_base_dir()?;
    let paths = daemon.paths().clone();

    if cli.daemon && std::env::var_os(DETACHED_ENV).is_none() {
        if daemon.is_locked() {
            return Ok(already_running(daemon));
        }
        load_config(cli, &paths.base_dir)?;
        let config_path = cli
            .config
            .as_ref()
            .map(std::path::absolute)
            .transpose()
            .context("Failed to resolve config path")?;
        let args = cli.forward_args(&paths.base_dir, config_path.as_deref());
        let pid = daemon.spawn_detached(&args)?;
        println!("{} (PID: {})", "linkrelay started".green(), pid);
        return Ok(exit_code::OK);
    }

    let _lock = match InstanceLock::acquire_retrying(&paths.lock_file, LOCK_ATTEMPTS, LOCK_RETRY_INTERVAL) {
        Ok(lock) => lock,
        Err(LockError::Held { .. }) => return Ok(already_running(daemon)),
        Err(e) => return Err(e.into()),
    };

    let config = load_config(cli, &paths.base_dir)?;
    setup_logging(&paths.log_file, cli.verbosity).context("Failed to setup logging")?;
    info!(version = env!("GIT_DESCRIBE"), base_dir = %paths.base_dir.display(), "linkrelay starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let result = runtime.block_on(run_relay(cli, config, paths));
    if let Err(e) = &result {
        tracing::error!(error = ?e, "linkrelay failed");
    }
    result
}

async fn run_relay(cli: &Cli, config: Config, paths: Paths) -> Result<i32> {
    debug!("run_relay: called");
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let pid = std::process::id();
    let cursor = BucketCursor::restore(StateStore::new(&paths.state_file), pid, cli.timestamp)
        .context("Failed to restore checkpoint")?;

    let credentials = config.credentials()?;
    let timeout = Duration::from_millis(config.source.timeout_ms);
    let source = Arc::new(HttpSource::new(
        &config.source.url,
        &config.source.publisher,
        credentials.clone(),
        timeout,
    )?);
    let sink = Arc::new(HttpPublisher::new(
        config.sink_url(),
        &config.sink.publisher,
        credentials,
        timeout,
    )?);
    info!(endpoint = %sink.endpoint(), "Publishing to sink");

    let chain = create_chain(&config)?;
    let restored = chain.load_caches(&paths.base_dir);
    info!(
        count = restored.loaded,
        failed = restored.failed.len(),
        "Restored expander caches"
    );

    let available = source
        .buckets()
        .await
        .context(format!("Stream provider {} is unreachable", config.source.url))?;
    info!(buckets = available.len(), "Stream provider reachable");

    let options = RelayOptions::from_config(&config, paths.base_dir.clone());
    let relay = Relay::new(source, sink, Arc::new(chain), cursor, options);

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(relay.run(shutdown_rx));

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
    let _ = shutdown_tx.send(()).await;

    let stats = handle.await.context("Relay task panicked")??;
    info!(?stats, "linkrelay exiting");
    Ok(exit_code::OK)
}
