//! LruCache - bounded least-recently-used cache
//!
//! A generic key/value store that evicts its least recently used entries once
//! it grows past a fixed capacity. Long-lived processes use it to memoize
//! expensive lookups without unbounded memory growth.
//!
//! # Layers
//!
//! - [`LruCache`] - single-owner cache, every operation O(1)
//! - [`SharedCache`] - `RwLock` wrapper for concurrent callers
//! - [`persist`] - save/restore entries as an ordered YAML list of pairs
//!
//! # Example
//!
//! ```
//! use lrucache::LruCache;
//!
//! let mut cache = LruCache::new(2);
//! cache.put("a", 1);
//! cache.put("b", 2);
//! cache.get(&"a");
//! cache.put("c", 3);
//! assert!(cache.peek(&"b").is_none());
//! ```

mod cache;
pub mod cli;
pub mod persist;
mod shared;

pub use cache::{EntryInfo, LruCache};
pub use persist::PersistError;
pub use shared::SharedCache;

/// Default capacity for caches that don't pick their own
pub const DEFAULT_CAPACITY: usize = 50_000;
