//! Daemon process management
//!
//! Single-instance locking, pid lookup, stop, and detaching into the
//! background. Everything lives under one base directory:
//!
//! ```text
//! <basedir>/lr.log       append-only log
//! <basedir>/lr.lock      held by the running instance
//! <basedir>/state.yml    pid and checkpoint
//! ```
//!
//! The running instance holds an exclusive lock on `lr.lock`. Status checks
//! take a shared lock for a moment instead, so concurrent checks never see
//! each other as a running instance. A check can still overlap a starting
//! instance's attempt, which is why startup retries a contended lock briefly.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use eyre::{Context, Result};
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::StateStore;

/// Process exit codes
pub mod exit_code {
    pub const OK: i32 = 0;
    /// Startup failure, or `pid` with nothing running
    pub const FAILURE: i32 = 1;
    pub const ALREADY_RUNNING: i32 = 2;
    /// `stop` gave up waiting
    pub const STOP_FAILED: i32 = 3;
}

/// Set in the environment of a detached child so it runs in the foreground
pub const DETACHED_ENV: &str = "LINKRELAY_DETACHED";

/// File locations under the base directory
#[derive(Debug, Clone)]
pub struct Paths {
    pub base_dir: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub state_file: PathBuf,
}

impl Paths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            log_file: base_dir.join("lr.log"),
            lock_file: base_dir.join("lr.lock"),
            state_file: base_dir.join("state.yml"),
            base_dir,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {path} is held by another instance")]
    Held { path: PathBuf },

    #[error("I/O error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Attempts made by [`InstanceLock::acquire_retrying`] at startup
pub const LOCK_ATTEMPTS: u32 = 5;

/// Pause between startup lock attempts
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Exclusive advisory lock, released on drop
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
}

impl InstanceLock {
    /// Take the lock without blocking
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        debug!(path = %path.display(), "InstanceLock::acquire: called");
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("InstanceLock::acquire: acquired");
                Ok(Self { file })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(LockError::Held {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(io_err(e)),
        }
    }

    /// Like [`acquire`](Self::acquire), retrying while the lock is contended
    pub fn acquire_retrying(path: &Path, attempts: u32, interval: Duration) -> Result<Self, LockError> {
        debug!(path = %path.display(), attempts, ?interval, "InstanceLock::acquire_retrying: called");
        let mut attempt = 1;
        loop {
            match Self::acquire(path) {
                Err(LockError::Held { .. }) if attempt < attempts => {
                    attempt += 1;
                    thread::sleep(interval);
                }
                result => return result,
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "InstanceLock::drop: unlock failed");
        }
    }
}

/// Outcome of [`Daemon::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped(u32),
    StillRunning(u32),
}

/// Control surface for an instance rooted at one base directory
#[derive(Debug, Clone)]
pub struct Daemon {
    paths: Paths,
}

impl Daemon {
    pub fn new(paths: Paths) -> Self {
        debug!(?paths, "Daemon::new: called");
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Whether some process holds the instance lock
    pub fn is_locked(&self) -> bool {
        debug!("Daemon::is_locked: called");
        let file = match File::open(&self.paths.lock_file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(error = %e, "Could not open instance lock");
                return false;
            }
        };
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                if let Err(e) = FileExt::unlock(&file) {
                    debug!(error = %e, "Daemon::is_locked: unlock failed");
                }
                false
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => true,
            Err(e) => {
                warn!(error = %e, "Could not check instance lock");
                false
            }
        }
    }

    /// Pid of the running instance, if any
    pub fn running_pid(&self) -> Option<u32> {
        debug!("Daemon::running_pid: called");
        if !self.is_locked() {
            debug!("Daemon::running_pid: lock is free");
            return None;
        }
        let result = StateStore::new(&self.paths.state_file)
            .recorded_pid()
            .filter(|&pid| is_process_running(pid));
        debug!(?result, "Daemon::running_pid: returning");
        result
    }

    /// Send SIGTERM and wait for the instance to let go of the lock
    pub fn stop(&self, attempts: u32, interval: Duration) -> Result<StopOutcome> {
        debug!(attempts, ?interval, "Daemon::stop: called");
        let Some(pid) = self.running_pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        info!(pid, "Stopping relay...");
        send_sigterm(pid)?;

        for attempt in 0..attempts {
            if !self.is_locked() || !is_process_running(pid) {
                debug!(attempt, "Daemon::stop: instance exited");
                info!(pid, "Relay stopped");
                return Ok(StopOutcome::Stopped(pid));
            }
            thread::sleep(interval);
        }

        if !self.is_locked() || !is_process_running(pid) {
            return Ok(StopOutcome::Stopped(pid));
        }
        warn!(pid, "Relay did not stop in time");
        Ok(StopOutcome::StillRunning(pid))
    }

    /// Re-run the current executable detached from the terminal
    ///
    /// The child gets [`DETACHED_ENV`] set, its own session, no stdin, and
    /// stdout/stderr appended to the log file. Returns the child's pid.
    pub fn spawn_detached(&self, args: &[String]) -> Result<u32> {
        debug!(?args, "Daemon::spawn_detached: called");
        let exe = std::env::current_exe().context("Failed to get current executable")?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.log_file)
            .context(format!("Failed to open log file {}", self.paths.log_file.display()))?;
        let log_err = log.try_clone().context("Failed to duplicate log file handle")?;

        let mut command = Command::new(&exe);
        command
            .args(args)
            .env(DETACHED_ENV, "1")
            .current_dir(&self.paths.base_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid is async-signal-safe and touches no state of the parent
            unsafe {
                command.pre_exec(|| nix::unistd::setsid().map(|_| ()).map_err(io::Error::from));
            }
        }

        let child = command.spawn().context("Failed to spawn detached relay")?;
        let pid = child.id();
        info!(pid, "Relay detached");
        Ok(pid)
    }

    /// Create the base directory if needed
    pub fn ensure_base_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.base_dir)
            .context(format!("Failed to create base directory {}", self.paths.base_dir.display()))
    }
}

fn send_sigterm(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    debug!(pid, "send_sigterm: called");
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(eyre::eyre!("Failed to send SIGTERM to {}: {}", pid, e)),
    }
}

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Signal 0 checks existence; EPERM means it exists under another user
    let result = matches!(kill(Pid::from_raw(pid as i32), None), Ok(()) | Err(Errno::EPERM));
    debug!(pid, result, "is_process_running: returning");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayState;
    use tempfile::TempDir;

    fn daemon(dir: &TempDir) -> Daemon {
        Daemon::new(Paths::new(dir.path()))
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::new("/var/lib/linkrelay");
        assert_eq!(paths.log_file, PathBuf::from("/var/lib/linkrelay/lr.log"));
        assert_eq!(paths.lock_file, PathBuf::from("/var/lib/linkrelay/lr.lock"));
        assert_eq!(paths.state_file, PathBuf::from("/var/lib/linkrelay/state.yml"));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lr.lock");

        let held = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(InstanceLock::acquire(&path), Err(LockError::Held { .. })));

        drop(held);
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_status_checks_do_not_block_each_other() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        drop(InstanceLock::acquire(&daemon.paths().lock_file).unwrap());

        let reader = File::open(&daemon.paths().lock_file).unwrap();
        FileExt::try_lock_shared(&reader).unwrap();
        assert!(!daemon.is_locked());
        FileExt::unlock(&reader).unwrap();
    }

    #[test]
    fn test_startup_waits_out_a_status_check() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lr.lock");
        drop(InstanceLock::acquire(&path).unwrap());

        let reader = File::open(&path).unwrap();
        FileExt::try_lock_shared(&reader).unwrap();
        assert!(matches!(InstanceLock::acquire(&path), Err(LockError::Held { .. })));

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            FileExt::unlock(&reader).unwrap();
        });
        let lock = InstanceLock::acquire_retrying(&path, 50, Duration::from_millis(10));
        release.join().unwrap();
        assert!(lock.is_ok());
    }

    #[test]
    fn test_retrying_gives_up_on_a_running_instance() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lr.lock");

        let _held = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::acquire_retrying(&path, 3, Duration::from_millis(1)),
            Err(LockError::Held { .. })
        ));
    }

    #[test]
    fn test_nothing_running_in_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);

        assert!(!daemon.is_locked());
        assert_eq!(daemon.running_pid(), None);
        assert_eq!(
            daemon.stop(1, Duration::from_millis(1)).unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[test]
    fn test_running_pid_requires_lock() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        let me = std::process::id();
        StateStore::new(&daemon.paths().state_file)
            .save(&RelayState { pid: me, timestamp: None })
            .unwrap();

        assert_eq!(daemon.running_pid(), None);

        let _lock = InstanceLock::acquire(&daemon.paths().lock_file).unwrap();
        assert!(daemon.is_locked());
        assert_eq!(daemon.running_pid(), Some(me));
    }

    #[test]
    fn test_process_liveness() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(0));
    }
}
