//! LRU cache with per-entry TTL
//!
//! Single-threaded; callers wrap it in a lock. Bounded by entry count only.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct LruEntry<V> {
    value: V,
    last_access: u64,
    expires_at: Instant,
}

impl<V> LruEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// LRU cache with TTL (time-to-live) support
#[derive(Debug)]
pub struct TtlLruCache<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
    /// Access counter for LRU tracking
    access_counter: u64,
}

impl<K: Eq + Hash + Clone, V> TtlLruCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity,
            default_ttl,
            access_counter: 0,
        }
    }

    /// Get a value if it exists and hasn't expired. Expired entries are
    /// dropped on the way out.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = counter;
            &entry.value
        })
    }

    /// Check for a live entry without touching its access time
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired(Instant::now()))
            .unwrap_or(false)
    }

    /// Insert with the default TTL, returning the replaced value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    /// Insert with a custom TTL
    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) -> Option<V> {
        self.access_counter += 1;
        let entry = LruEntry {
            value,
            last_access: self.access_counter,
            expires_at: Instant::now() + ttl,
        };

        if let Some(existing) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(existing, entry).value);
        }

        if self.entries.len() >= self.capacity {
            self.cleanup_expired();
        }
        while self.entries.len() >= self.capacity {
            self.evict_lru();
        }

        self.entries.insert(key, entry);
        None
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries (including potentially expired ones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn evict_lru(&mut self) {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = lru_key {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let mut cache = TtlLruCache::new(2, Duration::from_secs(60));

        cache.insert("a", 1);
        cache.insert("b", 2);

        // Access "a" to make it more recent
        cache.get(&"a");

        // Insert "c", should evict "b" (least recently used)
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn test_update_returns_old_value() {
        let mut cache = TtlLruCache::new(2, Duration::from_secs(60));

        cache.insert("a", 1);
        let old = cache.insert("a", 10);

        assert_eq!(old, Some(1));
        assert_eq!(cache.get(&"a"), Some(&10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let mut cache = TtlLruCache::new(4, Duration::from_secs(60));
        cache.insert_with_ttl("short", 1, Duration::from_millis(0));
        cache.insert("long", 2);

        assert!(!cache.contains(&"short"));
        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"long"), Some(&2));
    }

    #[test]
    fn test_expired_entries_go_before_live_ones() {
        let mut cache = TtlLruCache::new(2, Duration::from_secs(60));
        cache.insert("live", 1);
        cache.insert_with_ttl("stale", 2, Duration::from_millis(0));

        // "live" is least recently used, but the expired entry goes first
        cache.insert("new", 3);

        assert!(cache.contains(&"live"));
        assert!(cache.contains(&"new"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cleanup_expired() {
        let mut cache = TtlLruCache::new(8, Duration::from_millis(0));
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert_with_ttl(3, "c", Duration::from_secs(60));

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
    }
}
