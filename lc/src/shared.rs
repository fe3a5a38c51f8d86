//! Thread-safe wrapper around [`LruCache`]

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{EntryInfo, LruCache};

/// An [`LruCache`] behind a `RwLock`, shared by reference between workers
///
/// A hit reorders the recency list, so `get` takes the write lock. Only
/// `peek`, `contains_key`, `len`, and snapshots run under the read lock.
/// Callers must not hold a value across slow work expecting it to stay
/// cached; compute outside the lock and `put` the result.
#[derive(Debug)]
pub struct SharedCache<K: Hash + Eq, V> {
    inner: RwLock<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> Default for SharedCache<K, V> {
    fn default() -> Self {
        Self::from(LruCache::default())
    }
}

impl<K: Hash + Eq, V> From<LruCache<K, V>> for SharedCache<K, V> {
    fn from(cache: LruCache<K, V>) -> Self {
        Self {
            inner: RwLock::new(cache),
        }
    }
}

impl<K: Hash + Eq, V> SharedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self::from(LruCache::new(capacity))
    }

    // The cache holds plain data and every mutation leaves it consistent, so a
    // panic in another holder does not invalidate it.
    fn read(&self) -> RwLockReadGuard<'_, LruCache<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().contains_key(key)
    }

    pub fn entry_info<Q>(&self, key: &Q) -> Option<EntryInfo>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().entry_info(key)
    }

    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.write().put(key, value)
    }

    pub fn delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.write().delete(key)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Insert pairs in order under a single write lock
    pub fn extend<I: IntoIterator<Item = (K, V)>>(&self, iter: I) {
        self.write().extend(iter);
    }
}

impl<K: Hash + Eq, V: Clone> SharedCache<K, V> {
    /// Clone out a value and mark it as most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.write().get(key).cloned()
    }

    /// Clone out a value without touching its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().peek(key).cloned()
    }

    /// Return the cached value or compute it while holding the write lock
    ///
    /// Only suitable for cheap `f`; slow lookups should `get`, compute, then `put`.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.write().get_or_insert_with(key, f)
    }
}

impl<K: Hash + Eq + Clone, V: Clone> SharedCache<K, V> {
    /// Snapshot of every entry, least recently used first
    pub fn entries(&self) -> Vec<(K, V)> {
        self.read().entries()
    }
}
