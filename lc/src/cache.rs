//! Single-owner LRU cache

use std::borrow::Borrow;
use std::hash::Hash;
use std::time::SystemTime;

use hashlink::LinkedHashMap;
use log::debug;

use crate::DEFAULT_CAPACITY;

/// Accounting kept alongside each cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Reads served since the value was stored
    pub hits: u64,
    /// Last time the value was stored or read
    pub last_access: SystemTime,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    info: EntryInfo,
}

impl<V> Slot<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            info: EntryInfo {
                hits: 0,
                last_access: SystemTime::now(),
            },
        }
    }
}

/// Bounded key/value store that evicts the least recently used entry first
///
/// The linked map's order is the eviction order. The front holds the least
/// recently used entry and the back the most recent one. A hit moves an entry
/// to the back, and new entries join at the back, so entries that were never
/// read leave in insertion order.
#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    map: LinkedHashMap<K, Slot<V>>,
    capacity: usize,
}

impl<K: Hash + Eq, V> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    /// Create an empty cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            map: LinkedHashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of entries kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting straight away when shrinking
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    /// Number of entries currently cached
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Look up a value and mark it as most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.map.to_back(key)?;
        slot.info.hits += 1;
        slot.info.last_access = SystemTime::now();
        Some(&slot.value)
    }

    /// Look up a value without touching its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|slot| &slot.value)
    }

    /// Hit count and last access time for a key
    pub fn entry_info<Q>(&self, key: &Q) -> Option<EntryInfo>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).map(|slot| slot.info)
    }

    /// Insert or replace a value as the most recent entry, then evict down to capacity
    ///
    /// Returns the value previously stored under `key`.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.map.insert(key, Slot::new(value)).map(|slot| slot.value);
        self.evict();
        previous
    }

    /// Remove a key, returning its value
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key).map(|slot| slot.value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Iterate entries from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter().map(|(key, slot)| (key, &slot.value))
    }

    /// Drop entries from the front until the cache fits its capacity
    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.map.len() > self.capacity {
            if self.map.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!("evict: dropped {} entries (capacity {})", evicted, self.capacity);
        }
        evicted
    }
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Return the cached value, or compute, store, and return it
    pub fn get_or_insert_with<F>(&mut self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value.clone();
        }
        let value = f();
        self.put(key, value.clone());
        value
    }

    /// Fallible [`get_or_insert_with`](Self::get_or_insert_with); errors are not cached
    pub fn try_get_or_insert_with<F, E>(&mut self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value.clone());
        }
        let value = f()?;
        self.put(key, value.clone());
        Ok(value)
    }
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Snapshot of every entry, least recently used first
    pub fn entries(&self) -> Vec<(K, V)> {
        self.iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }
}

impl<K: Hash + Eq, V> Extend<(K, V)> for LruCache<K, V> {
    /// Insert pairs in iteration order, so the last pair ends up most recent
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.put(key, value);
        }
    }
}
