//! Memoization cache for in-process function results
//!
//! Entry-count bounded with a TTL; no byte accounting and no persistence.
//! Concurrent misses for the same key may both compute; the later insert
//! wins.

use super::lru::TtlLruCache;
use enrich_foundation::{MemoConfig, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Memo cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl MemoStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-aware memoization keyed by any hashable value
pub struct MemoCache<K, V> {
    entries: Mutex<TtlLruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(TtlLruCache::new(max_entries, ttl)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &MemoConfig) -> Self {
        Self::new(config.max_entries, config.ttl())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.lock().get(key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().insert(key, value);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.lock().insert_with_ttl(key, value, ttl);
    }

    /// Return the cached value or compute, store and return it
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        // Computed outside the lock so `compute` may use this cache
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    pub async fn get_or_compute_async<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute().await;
        self.insert(key, value.clone());
        value
    }

    /// Errors are returned to the caller and not cached
    pub async fn get_or_try_compute_async<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        self.entries.lock().cleanup_expired()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> MemoStats {
        let entries = self.entries.lock();
        MemoStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.capacity(),
        }
    }
}

impl<K, V> std::fmt::Debug for MemoCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_foundation::Error;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_get_or_compute_runs_once() {
        let memo: MemoCache<String, usize> = MemoCache::new(16, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let v = memo.get_or_compute("len".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                42
            });
            assert_eq!(v, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = memo.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_capacity_bound() {
        let memo = MemoCache::new(2, Duration::from_secs(60));
        memo.insert(1, "a");
        memo.insert(2, "b");
        memo.get(&1);
        memo.insert(3, "c");

        assert_eq!(memo.len(), 2);
        assert_eq!(memo.get(&1), Some("a"));
        assert_eq!(memo.get(&2), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let memo = MemoCache::new(4, Duration::from_secs(60));
        memo.insert_with_ttl("k", 1, Duration::from_millis(0));
        assert_eq!(memo.get(&"k"), None);
    }

    #[test]
    fn test_async_compute() {
        let memo: MemoCache<u32, String> = MemoCache::new(4, Duration::from_secs(60));
        let v = tokio_test::block_on(
            memo.get_or_compute_async(7, || async { "seven".to_string() }),
        );
        assert_eq!(v, "seven");
        assert_eq!(memo.get(&7).as_deref(), Some("seven"));
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let memo: MemoCache<u32, u32> = MemoCache::new(4, Duration::from_secs(60));

        let err = memo
            .get_or_try_compute_async(1, || async { Err(Error::Internal("boom".into())) })
            .await;
        assert!(err.is_err());
        assert!(memo.is_empty());

        let ok = memo
            .get_or_try_compute_async(1, || async { Ok(10) })
            .await
            .unwrap();
        assert_eq!(ok, 10);
        assert!(memo.invalidate(&1));
    }
}
