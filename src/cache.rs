//! Capacity-bounded LRU cache for rendered output
//!
//! A thin layer over [`lru::LruCache`] that allows a zero capacity (the cache
//! then stores nothing) and feeds a process-wide running total of live
//! entries, readable with [`total_entries`] for instrumentation.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use tracing::trace;

static TOTAL_ENTRIES: AtomicUsize = AtomicUsize::new(0);

/// Live entries across every [`BoundedCache`] in the process
pub fn total_entries() -> usize {
    TOTAL_ENTRIES.load(Ordering::Relaxed)
}

/// Key-value store that never holds more than `capacity` entries
pub struct BoundedCache<K: Hash + Eq, V> {
    capacity: usize,
    /// `None` when the capacity is zero
    entries: Option<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    /// Create an empty cache; a capacity of zero stores nothing
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a value and mark it most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_mut()?.get(key)
    }

    /// Look up a value without touching its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_ref()?.peek(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.as_ref().is_some_and(|entries| entries.contains(key))
    }

    /// Insert or replace a value as most recently used
    ///
    /// Evicts the least recently used entry when the insert would exceed the
    /// capacity.
    pub fn set(&mut self, key: K, value: V) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };

        let replacing = entries.contains(&key);
        match entries.push(key, value) {
            None => {
                TOTAL_ENTRIES.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) if replacing => {}
            Some(_) => {
                trace!(capacity = self.capacity, "Evicted least recently used cache entry");
            }
        }
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        let removed = self.len();
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        TOTAL_ENTRIES.fetch_sub(removed, Ordering::Relaxed);
    }
}

impl<K: Hash + Eq, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl<K: Hash + Eq, V> Drop for BoundedCache<K, V> {
    fn drop(&mut self) {
        TOTAL_ENTRIES.fetch_sub(self.len(), Ordering::Relaxed);
    }
}
