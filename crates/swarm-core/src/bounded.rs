//! Capped map with insertion-order eviction
//!
//! Inserting a new key while at capacity evicts the oldest inserted key.
//! Updating an existing key keeps its original position. Backed by an
//! `LruCache` that is only read through `peek`/`peek_mut` and only promotes
//! keys when they are first inserted, so its recency order is the insertion
//! order.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

#[derive(Debug)]
pub struct BoundedMap<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedMap<K, V> {
    /// A capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Insert or replace a value. Returns the evicted entry, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.peek_mut(&key) {
            *slot = value;
            return None;
        }
        self.entries.push(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.peek(key)
    }

    /// Mutable access to the value for `key`, inserting `default()` first if absent
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        if !self.entries.contains(&key) {
            let value = default();
            return self.entries.get_or_insert_mut(key, || value);
        }
        self.entries
            .peek_mut(&key)
            .unwrap_or_else(|| unreachable!("key checked present"))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().rev().map(|(k, _)| k)
    }
}
