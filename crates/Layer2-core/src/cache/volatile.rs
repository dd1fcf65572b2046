//! Volatile result cache (tier 1)
//!
//! In-memory, access-ordered, bounded by entry count and total bytes.
//!
//! - Lookups take a shard read lock and bump atomic access counters, so a
//!   lookup never waits on eviction of a different key.
//! - Expired entries are treated as absent on lookup and physically removed
//!   by the next sweep.
//! - The TTL counts from insertion into this tier, not from the entry's
//!   `created_at`. An entry promoted from tier 2 starts a fresh TTL; tier 2
//!   has no expiry of its own and is trimmed by invalidation or a purge.
//! - A sweep runs after any write that breaks a bound and evicts in strict
//!   least-recently-accessed order until both bounds hold.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use enrich_foundation::{CacheEntry, EvictionReason, Fingerprint, ResultCacheConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Tier-1 bounds
#[derive(Debug, Clone)]
pub struct VolatileConfig {
    pub max_bytes: u64,
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self::from(&ResultCacheConfig::default())
    }
}

impl From<&ResultCacheConfig> for VolatileConfig {
    fn from(config: &ResultCacheConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_entries: config.max_entries,
            ttl: config.ttl(),
        }
    }
}

/// An entry that left tier 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub reason: EvictionReason,
}

/// Result of a tier-1 write
#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    /// False when the entry is larger than the whole byte budget
    pub stored: bool,
    pub evicted: Vec<Evicted>,
}

struct Slot {
    entry: CacheEntry,
    inserted: Instant,
    /// Logical clock value of the last access
    last_access: AtomicU64,
    access_count: AtomicU64,
    last_accessed_ms: AtomicI64,
}

impl Slot {
    fn new(entry: CacheEntry, clock: u64) -> Self {
        Self {
            access_count: AtomicU64::new(entry.access_count),
            last_accessed_ms: AtomicI64::new(entry.last_accessed_at.timestamp_millis()),
            entry,
            inserted: Instant::now(),
            last_access: AtomicU64::new(clock),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }

    fn touch(&self, clock: u64) {
        self.last_access.store(clock, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Entry with current access bookkeeping
    fn snapshot(&self) -> CacheEntry {
        let mut entry = self.entry.clone();
        entry.access_count = self.access_count.load(Ordering::Relaxed);
        entry.last_accessed_at =
            DateTime::from_timestamp_millis(self.last_accessed_ms.load(Ordering::Relaxed))
                .unwrap_or(entry.last_accessed_at);
        entry
    }
}

/// Tier-1 cache
pub struct VolatileResultCache {
    config: VolatileConfig,
    slots: DashMap<Fingerprint, Slot>,
    total_bytes: AtomicU64,
    clock: AtomicU64,
    /// Serializes sweeps; lookups never take it
    sweep_lock: Mutex<()>,
}

impl VolatileResultCache {
    pub fn new(config: VolatileConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            sweep_lock: Mutex::new(()),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Live entry for a fingerprint; bumps its recency
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let slot = self.slots.get(fingerprint)?;
        if slot.is_expired(self.config.ttl) {
            trace!(fingerprint = %fingerprint.short(), "Tier-1 entry expired");
            return None;
        }
        slot.touch(self.tick());
        Some(slot.snapshot())
    }

    /// Live entry without touching recency
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.slots
            .get(fingerprint)
            .filter(|slot| !slot.is_expired(self.config.ttl))
            .map(|slot| slot.snapshot())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.peek(fingerprint).is_some()
    }

    /// Store an entry, then sweep if a bound is exceeded
    pub fn insert(&self, entry: CacheEntry) -> InsertOutcome {
        let size = entry.size_bytes;
        if size > self.config.max_bytes {
            debug!(
                fingerprint = %entry.fingerprint.short(),
                size_bytes = size,
                max_bytes = self.config.max_bytes,
                "Entry larger than tier-1 budget, not cached in memory"
            );
            return InsertOutcome::default();
        }

        let fingerprint = entry.fingerprint;
        // Account before publishing the slot so a concurrent sweep never
        // subtracts bytes that were not added yet
        self.total_bytes.fetch_add(size, Ordering::SeqCst);
        let slot = Slot::new(entry, self.tick());
        if let Some(old) = self.slots.insert(fingerprint, slot) {
            self.total_bytes
                .fetch_sub(old.entry.size_bytes, Ordering::SeqCst);
        }

        let evicted = if self.over_budget() {
            self.sweep()
        } else {
            Vec::new()
        };

        InsertOutcome {
            stored: true,
            evicted,
        }
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.slots.remove(fingerprint).map(|(_, slot)| {
            self.total_bytes
                .fetch_sub(slot.entry.size_bytes, Ordering::SeqCst);
            slot.entry
        })
    }

    /// Physically remove expired entries
    pub fn purge_expired(&self) -> Vec<Evicted> {
        let _guard = self.sweep_lock.lock();
        self.purge_expired_locked()
    }

    fn purge_expired_locked(&self) -> Vec<Evicted> {
        let ttl = self.config.ttl;
        let expired: Vec<Fingerprint> = self
            .slots
            .iter()
            .filter(|slot| slot.is_expired(ttl))
            .map(|slot| *slot.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|fp| {
                self.slots
                    .remove_if(&fp, |_, slot| slot.is_expired(ttl))
                    .map(|(_, slot)| self.account_removal(slot, EvictionReason::Expired))
            })
            .collect()
    }

    fn account_removal(&self, slot: Slot, reason: EvictionReason) -> Evicted {
        let size_bytes = slot.entry.size_bytes;
        self.total_bytes.fetch_sub(size_bytes, Ordering::SeqCst);
        Evicted {
            fingerprint: slot.entry.fingerprint,
            size_bytes,
            reason,
        }
    }

    fn over_budget(&self) -> bool {
        self.slots.len() > self.config.max_entries
            || self.total_bytes.load(Ordering::SeqCst) > self.config.max_bytes
    }

    /// Purge expired entries, then evict least recently accessed entries
    /// until both bounds hold
    fn sweep(&self) -> Vec<Evicted> {
        let _guard = self.sweep_lock.lock();
        let mut evicted = self.purge_expired_locked();
        if !self.over_budget() {
            return evicted;
        }

        let mut candidates: Vec<(u64, Fingerprint)> = self
            .slots
            .iter()
            .map(|slot| (slot.last_access.load(Ordering::Relaxed), *slot.key()))
            .collect();
        candidates.sort_unstable();

        for (_, fingerprint) in candidates {
            if !self.over_budget() {
                break;
            }
            let reason = if self.slots.len() > self.config.max_entries {
                EvictionReason::Capacity
            } else {
                EvictionReason::Bytes
            };
            if let Some((_, slot)) = self.slots.remove(&fingerprint) {
                let gone = self.account_removal(slot, reason);
                debug!(
                    fingerprint = %gone.fingerprint.short(),
                    size_bytes = gone.size_bytes,
                    reason = ?gone.reason,
                    "Evicted from tier 1"
                );
                evicted.push(gone);
            }
        }

        evicted
    }

    /// Drop everything, returning the number of removed entries
    pub fn clear(&self) -> usize {
        let _guard = self.sweep_lock.lock();
        let keys: Vec<Fingerprint> = self.slots.iter().map(|slot| *slot.key()).collect();
        keys.iter().filter(|fp| self.remove(fp).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &VolatileConfig {
        &self.config
    }
}

impl std::fmt::Debug for VolatileResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileResultCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}
