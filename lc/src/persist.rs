//! Cache persistence
//!
//! A cache file is a YAML sequence of `[key, value]` pairs, least recently
//! used first. Loading replays the pairs in file order, so recency survives a
//! restart. Hit counts and access times are not persisted.

use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{LruCache, SharedCache};

/// Errors reading or writing a cache file
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write pairs to `path`, replacing it atomically
pub fn save<K, V>(path: &Path, entries: &[(K, V)]) -> Result<(), PersistError>
where
    K: Serialize,
    V: Serialize,
{
    debug!("save: writing {} entries to {}", entries.len(), path.display());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
    }

    let content = serde_yaml::to_string(entries).map_err(|source| PersistError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = temp_path(path);
    fs::write(&tmp, content).map_err(|e| PersistError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))?;
    Ok(())
}

/// Read pairs from `path`; a missing or empty file yields no pairs
pub fn load<K, V>(path: &Path) -> Result<Vec<(K, V)>, PersistError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    if !path.exists() {
        debug!("load: {} does not exist", path.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| PersistError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<(K, V)> = serde_yaml::from_str(&content).map_err(|source| PersistError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("load: read {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Save every entry to `path`, least recently used first
    pub fn save_to(&self, path: &Path) -> Result<(), PersistError> {
        save(path, &self.entries())
    }

    /// Replay the pairs stored at `path`, returning how many were read
    pub fn load_from(&mut self, path: &Path) -> Result<usize, PersistError> {
        let entries: Vec<(K, V)> = load(path)?;
        let count = entries.len();
        self.extend(entries);
        Ok(count)
    }
}

impl<K, V> SharedCache<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Save a snapshot of the cache to `path`
    ///
    /// The snapshot is taken under the read lock and written after it is released.
    pub fn save_to(&self, path: &Path) -> Result<(), PersistError> {
        let entries = self.entries();
        save(path, &entries)
    }

    /// Replay the pairs stored at `path`, returning how many were read
    pub fn load_from(&self, path: &Path) -> Result<usize, PersistError> {
        let entries: Vec<(K, V)> = load(path)?;
        let count = entries.len();
        self.extend(entries);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bitly.cache");

        let mut cache: LruCache<String, String> = LruCache::new(10);
        cache.put("http://bit.ly/a".into(), "http://example.com/a".into());
        cache.put("http://bit.ly/b".into(), "http://example.com/b".into());
        cache.put("http://bit.ly/c".into(), "http://example.com/c".into());
        cache.get("http://bit.ly/a");

        cache.save_to(&path).unwrap();

        let mut restored: LruCache<String, String> = LruCache::new(10);
        assert_eq!(restored.load_from(&path).unwrap(), 3);
        assert_eq!(restored.entries(), cache.entries());
    }

    #[test]
    fn test_load_into_smaller_cache_keeps_most_recent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small.cache");

        save(&path, &[("a", 1), ("b", 2), ("c", 3)]).unwrap();

        let mut cache: LruCache<String, i32> = LruCache::new(2);
        cache.load_from(&path).unwrap();

        assert_eq!(cache.entries(), vec![("b".to_string(), 2), ("c".to_string(), 3)]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let entries: Vec<(String, String)> = load(&temp_dir.path().join("nope.cache")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_load_empty_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.cache");
        fs::write(&path, "\n").unwrap();

        let entries: Vec<(String, String)> = load(&path).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.cache");
        fs::write(&path, "key: [unterminated").unwrap();

        let result: Result<Vec<(String, String)>, _> = load(&path);
        assert!(matches!(result, Err(PersistError::Format { .. })));
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("x.cache");

        save(&path, &[("k", "v")]).unwrap();

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
    }
}
