//! Persisted relay state: the recorded pid and the checkpoint
//!
//! Only the holder of the instance lock writes this file. Writes go to a
//! temporary sibling that is fsynced and renamed over the real file, so a
//! crash leaves either the old state or the new one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bucket::Bucket;

/// Errors reading or writing relay state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed state file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Refusing to move checkpoint from {checkpoint} to {bucket}")]
    NotMonotonic { checkpoint: Bucket, bucket: Bucket },
}

/// What survives a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
    /// Pid of the instance that last wrote the file
    pub pid: u32,

    /// Last committed bucket
    #[serde(default)]
    pub timestamp: Option<Bucket>,
}

/// YAML-backed store for [`RelayState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the state, `None` if it was never written
    pub fn load(&self) -> Result<Option<RelayState>, StateError> {
        debug!(path = %self.path.display(), "StateStore::load: called");
        if !self.path.exists() {
            debug!("StateStore::load: no state file");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        let state: RelayState = serde_yaml::from_str(&content).map_err(|source| StateError::Format {
            path: self.path.clone(),
            source,
        })?;
        debug!(?state, "StateStore::load: returning");
        Ok(Some(state))
    }

    /// Replace the state on disk
    pub fn save(&self, state: &RelayState) -> Result<(), StateError> {
        debug!(?state, path = %self.path.display(), "StateStore::save: called");
        let content = serde_yaml::to_string(state).map_err(|source| StateError::Format {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StateError::Io { path, source }
        };

        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(content.as_bytes()).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        Ok(())
    }

    /// Pid recorded by the last writer, if any
    pub fn recorded_pid(&self) -> Option<u32> {
        self.load().ok().flatten().map(|state| state.pid).filter(|pid| *pid != 0)
    }
}
