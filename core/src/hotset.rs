//! Hot-set: a small bounded LRU promoting frequently-read keys.
//!
//! The hot-set is a lookup accelerator, not a second source of truth — it holds cloned
//! snapshots of entries already present in the main store and is consulted first on `get`.
//! Eviction from the hot-set never touches the main store (invariant 5 in the data model).

use crate::key::Key;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Fixed-capacity LRU cache of hot keys, keyed by [`Key`] and holding a clone of `V`.
pub struct HotSet<V> {
    cache: LruCache<Key, V>,
    promotion_threshold: u64,
}

impl<V: Clone> HotSet<V> {
    /// `capacity` is clamped to at least 1; a hot-set of size 0 would be a contradiction in
    /// terms and the `lru` crate rejects it outright.
    #[must_use]
    pub fn new(capacity: usize, promotion_threshold: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            cache: LruCache::new(capacity),
            promotion_threshold,
        }
    }

    /// Look up `key`, refreshing its LRU position on hit.
    pub fn get(&mut self, key: &Key) -> Option<&V> {
        self.cache.get(key)
    }

    /// Promote `key` into the hot-set if `access_count` has crossed the threshold.
    ///
    /// Returns `true` if promotion happened this call.
    pub fn maybe_promote(&mut self, key: &Key, access_count: u64, value: &V) -> bool {
        if access_count < self.promotion_threshold {
            return false;
        }
        if self.cache.contains(key) {
            self.cache.get(key);
            return false;
        }
        self.cache.put(key.clone(), value.clone());
        true
    }

    /// Overwrite a key already in the hot-set (used when `Store::set` replaces a value that
    /// happens to be hot).
    pub fn update(&mut self, key: &Key, value: V) {
        if self.cache.contains(key) {
            self.cache.put(key.clone(), value);
        }
    }

    pub fn remove(&mut self, key: &Key) {
        self.cache.pop(key);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Key::new(s).unwrap()
    }

    #[test]
    fn promotion_requires_threshold() {
        let mut hot = HotSet::<i32>::new(2, 3);
        assert!(!hot.maybe_promote(&key("a"), 1, &1));
        assert!(!hot.maybe_promote(&key("a"), 2, &1));
        assert!(hot.maybe_promote(&key("a"), 3, &1));
        assert_eq!(hot.len(), 1);
    }

    #[test]
    fn eviction_is_lru_and_bounded() {
        let mut hot = HotSet::<i32>::new(2, 0);
        hot.maybe_promote(&key("a"), 0, &1);
        hot.maybe_promote(&key("b"), 0, &2);
        // touch "a" so "b" becomes least-recently-used
        hot.get(&key("a"));
        hot.maybe_promote(&key("c"), 0, &3);
        assert_eq!(hot.len(), 2);
        assert!(hot.get(&key("b")).is_none());
        assert!(hot.get(&key("a")).is_some());
        assert!(hot.get(&key("c")).is_some());
    }

    #[test]
    fn remove_and_clear() {
        let mut hot = HotSet::<i32>::new(4, 0);
        hot.maybe_promote(&key("a"), 0, &1);
        hot.remove(&key("a"));
        assert!(hot.is_empty());
        hot.maybe_promote(&key("b"), 0, &2);
        hot.clear();
        assert!(hot.is_empty());
    }
}
