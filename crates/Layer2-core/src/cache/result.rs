//! Result Cache - tier 1 + tier 2 orchestration
//!
//! Access pattern:
//! 1. Check tier 1 (memory)
//! 2. On tier-1 miss, check tier 2 (durable) and promote a hit into tier 1
//! 3. On a full miss, submit to the work queue, or join the job already in
//!    flight for the same fingerprint
//! 4. The finished result is written through both tiers before any waiter
//!    sees it
//!
//! Tier-2 failures never fail a lookup. The first failure flips the cache
//! into volatile-only mode for `retry_after`; the next successful tier-2 call
//! flips it back. An invalidation whose tier-2 delete fails is remembered;
//! tier 2 reads treat that fingerprint as absent until the delete is retried
//! successfully on recovery.
//!
//! Tier-2 calls are synchronous and run on the calling task's thread, not
//! on the blocking pool.

use super::volatile::{Evicted, VolatileConfig, VolatileResultCache};
use async_trait::async_trait;
use dashmap::DashSet;
use enrich_foundation::{
    CacheEntry, CacheTier, DurableStore, EngineConfig, EnrichmentResult, Error, EventBus,
    EventKind, Fingerprint, Result,
};
use enrich_task::{JobExecutor, Priority, QueueStats, WorkQueue, WorkQueueConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

// ============================================================================
// Outcome & stats
// ============================================================================

/// How a `resolve` call was answered
#[derive(Debug, Clone)]
pub enum ComputeOutcome {
    /// Served from a cache tier
    Hit { entry: CacheEntry, tier: CacheTier },

    /// This call started the computation
    MissComputed { entry: CacheEntry, duration_ms: u64 },

    /// This call joined a computation started by someone else
    MissCoalesced { entry: CacheEntry, waited_ms: u64 },

    /// The computation failed; every waiter sees the same error
    Failed { fingerprint: Fingerprint, error: Error },
}

impl ComputeOutcome {
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Hit { entry, .. }
            | Self::MissComputed { entry, .. }
            | Self::MissCoalesced { entry, .. } => Some(entry),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    pub fn into_result(self) -> Result<CacheEntry> {
        match self {
            Self::Hit { entry, .. }
            | Self::MissComputed { entry, .. }
            | Self::MissCoalesced { entry, .. } => Ok(entry),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by either tier
    pub hits: u64,
    pub tier1_hits: u64,
    pub tier2_hits: u64,
    /// Lookups answered by neither tier
    pub misses: u64,
    /// Misses that joined an in-flight computation
    pub coalesced: u64,
    pub evictions: u64,
    /// Waiters that received a failure
    pub failures: u64,
    pub tier1_bytes: u64,
    pub tier1_entries: usize,
    pub durable_degraded: bool,
}

impl CacheStats {
    /// Calculate overall hit rate
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Default)]
struct Counters {
    tier1_hits: AtomicU64,
    tier2_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
}

// ============================================================================
// Durable tier health
// ============================================================================

struct DurableTier {
    store: Arc<dyn DurableStore>,
    degraded: AtomicBool,
    retry_at: Mutex<Option<Instant>>,
    retry_after: Duration,
}

impl DurableTier {
    /// False while degraded and the retry window has not elapsed
    fn usable(&self) -> bool {
        if !self.degraded.load(Ordering::SeqCst) {
            return true;
        }
        match *self.retry_at.lock() {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct CacheInner {
    tier1: VolatileResultCache,
    durable: Option<DurableTier>,
    /// Invalidated fingerprints whose tier-2 delete has not gone through
    pending_deletes: DashSet<Fingerprint>,
    events: Arc<EventBus>,
    counters: Counters,
}

impl CacheInner {
    /// Tier 1, then tier 2 with promotion. No hit/miss accounting.
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<(CacheEntry, CacheTier)> {
        if let Some(entry) = self.tier1.get(fingerprint) {
            return Some((entry, CacheTier::Volatile));
        }

        let mut entry = self.durable_get(fingerprint)?;
        entry.access_count += 1;
        entry.last_accessed_at = chrono::Utc::now();
        self.promote(entry.clone());
        Some((entry, CacheTier::Durable))
    }

    fn record_hit(&self, fingerprint: &Fingerprint, tier: CacheTier, started: Instant) {
        let counter = match tier {
            CacheTier::Volatile => &self.counters.tier1_hits,
            CacheTier::Durable => &self.counters.tier2_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let latency_us = started.elapsed().as_micros() as u64;
        trace!(fingerprint = %fingerprint.short(), ?tier, latency_us, "Cache hit");
        self.events.publish(EventKind::Hit {
            fingerprint: *fingerprint,
            tier,
            latency_us,
        });
    }

    /// Write through both tiers
    fn store(&self, entry: &CacheEntry) {
        self.promote(entry.clone());

        if let Some(durable) = self.usable_durable() {
            match durable.store.put(&entry.fingerprint, entry) {
                Ok(()) => {
                    // A fresh result supersedes an earlier invalidation
                    self.pending_deletes.remove(&entry.fingerprint);
                    self.durable_ok(durable);
                }
                Err(e) => self.durable_failed(durable, "put", &e),
            }
        }
    }

    /// Tier-1 insert plus eviction bookkeeping
    fn promote(&self, entry: CacheEntry) {
        let outcome = self.tier1.insert(entry);
        self.record_evictions(outcome.evicted);
    }

    fn record_evictions(&self, evicted: Vec<Evicted>) {
        if evicted.is_empty() {
            return;
        }
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        for gone in evicted {
            self.events.publish(EventKind::Eviction {
                fingerprint: gone.fingerprint,
                size_bytes: gone.size_bytes,
                reason: gone.reason,
            });
        }
    }

    fn usable_durable(&self) -> Option<&DurableTier> {
        self.durable.as_ref().filter(|d| d.usable())
    }

    fn durable_get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        if self.pending_deletes.contains(fingerprint) {
            return None;
        }
        let durable = self.usable_durable()?;
        match durable.store.get(fingerprint) {
            Ok(found) => {
                self.durable_ok(durable);
                found
            }
            Err(e) => {
                self.durable_failed(durable, "get", &e);
                None
            }
        }
    }

    /// Attempted even while degraded; a failed delete is kept for retry
    fn durable_delete(&self, fingerprint: &Fingerprint) {
        let Some(durable) = &self.durable else {
            return;
        };
        self.pending_deletes.insert(*fingerprint);
        match durable.store.delete(fingerprint) {
            Ok(_) => {
                self.pending_deletes.remove(fingerprint);
                self.durable_ok(durable);
            }
            Err(e) => self.durable_failed(durable, "delete", &e),
        }
    }

    fn durable_ok(&self, durable: &DurableTier) {
        if durable.degraded.swap(false, Ordering::SeqCst) {
            *durable.retry_at.lock() = None;
            info!(store = durable.store.name(), "Durable tier recovered");
            self.events.publish(EventKind::StoreRecovered);
        }
        if !self.pending_deletes.is_empty() {
            self.retry_pending_deletes(durable);
        }
    }

    fn retry_pending_deletes(&self, durable: &DurableTier) {
        let pending: Vec<Fingerprint> = self.pending_deletes.iter().map(|fp| *fp).collect();
        for fingerprint in pending {
            match durable.store.delete(&fingerprint) {
                Ok(_) => {
                    self.pending_deletes.remove(&fingerprint);
                    debug!(fingerprint = %fingerprint.short(), "Deferred tier-2 delete applied");
                }
                Err(e) => {
                    warn!(
                        fingerprint = %fingerprint.short(),
                        "Deferred tier-2 delete failed: {}",
                        e
                    );
                    break;
                }
            }
        }
    }

    fn durable_failed(&self, durable: &DurableTier, op: &str, error: &Error) {
        *durable.retry_at.lock() = Some(Instant::now() + durable.retry_after);
        let was_degraded = durable.degraded.swap(true, Ordering::SeqCst);
        warn!(
            store = durable.store.name(),
            op,
            retry_after_secs = durable.retry_after.as_secs(),
            "Durable tier unavailable, continuing volatile-only: {}",
            error
        );
        if !was_degraded {
            self.events.publish(EventKind::StoreDegraded {
                reason: error.to_string(),
            });
        }
    }
}

/// Runs the caller's executor and writes the result through both tiers
/// before the queue releases it to waiters
struct WriteThrough<E> {
    inner: E,
    cache: Arc<CacheInner>,
    fingerprint: Fingerprint,
}

#[async_trait]
impl<E> JobExecutor<CacheEntry> for WriteThrough<E>
where
    E: JobExecutor<EnrichmentResult>,
{
    async fn execute(&self) -> Result<CacheEntry> {
        // A job that finished between our lookup and submit already cached it
        if let Some((entry, _)) = self.cache.lookup(&self.fingerprint) {
            return Ok(entry);
        }

        let started = Instant::now();
        let result = self.inner.execute().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let entry = CacheEntry::from_result(self.fingerprint, result, duration_ms);
        self.cache.store(&entry);
        Ok(entry)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// ResultCache
// ============================================================================

/// Two-tier result cache with coalesced computation of misses
pub struct ResultCache {
    inner: Arc<CacheInner>,
    queue: WorkQueue<CacheEntry>,
}

impl ResultCache {
    /// Build from engine configuration. Spawns the queue workers on the
    /// current runtime.
    pub fn new(
        config: &EngineConfig,
        durable: Option<Arc<dyn DurableStore>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_parts(
            VolatileConfig::from(&config.result_cache),
            WorkQueueConfig::from(&config.queue),
            durable,
            config.durable.retry_after(),
            events,
        )
    }

    pub fn with_parts(
        tier1: VolatileConfig,
        queue: WorkQueueConfig,
        durable: Option<Arc<dyn DurableStore>>,
        retry_after: Duration,
        events: Arc<EventBus>,
    ) -> Self {
        if let Some(store) = &durable {
            info!(store = store.name(), "Result cache using durable tier");
        }

        let inner = Arc::new(CacheInner {
            tier1: VolatileResultCache::new(tier1),
            durable: durable.map(|store| DurableTier {
                store,
                degraded: AtomicBool::new(false),
                retry_at: Mutex::new(None),
                retry_after,
            }),
            pending_deletes: DashSet::new(),
            events: Arc::clone(&events),
            counters: Counters::default(),
        });

        Self {
            inner,
            queue: WorkQueue::with_events(queue, events),
        }
    }

    /// Cached result, without computing
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let started = Instant::now();
        match self.inner.lookup(fingerprint) {
            Some((entry, tier)) => {
                self.inner.record_hit(fingerprint, tier, started);
                Some(entry)
            }
            None => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cached result, or the result of a (possibly shared) computation
    pub async fn get_or_compute<E>(
        &self,
        fingerprint: Fingerprint,
        priority: Priority,
        executor: E,
    ) -> Result<CacheEntry>
    where
        E: JobExecutor<EnrichmentResult> + 'static,
    {
        self.resolve(fingerprint, priority, executor)
            .await
            .into_result()
    }

    /// Like `get_or_compute`, reporting how the call was answered
    pub async fn resolve<E>(
        &self,
        fingerprint: Fingerprint,
        priority: Priority,
        executor: E,
    ) -> ComputeOutcome
    where
        E: JobExecutor<EnrichmentResult> + 'static,
    {
        let started = Instant::now();
        if let Some((entry, tier)) = self.inner.lookup(&fingerprint) {
            self.inner.record_hit(&fingerprint, tier, started);
            return ComputeOutcome::Hit { entry, tier };
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);

        let job = WriteThrough {
            inner: executor,
            cache: Arc::clone(&self.inner),
            fingerprint,
        };
        let handle = match self.queue.submit(fingerprint, priority, job) {
            Ok(handle) => handle,
            Err(error) => return self.failed(fingerprint, error),
        };

        let coalesced = handle.is_coalesced();
        if coalesced {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            self.inner
                .events
                .publish(EventKind::MissCoalesced { fingerprint });
        } else {
            debug!(fingerprint = %fingerprint.short(), %priority, "Cache miss, computing");
            self.inner
                .events
                .publish(EventKind::MissStarted { fingerprint });
        }

        match handle.wait().await {
            Ok(entry) if coalesced => ComputeOutcome::MissCoalesced {
                entry,
                waited_ms: started.elapsed().as_millis() as u64,
            },
            Ok(entry) => ComputeOutcome::MissComputed {
                duration_ms: entry.compute_duration_ms,
                entry,
            },
            Err(error) => self.failed(fingerprint, error),
        }
    }

    fn failed(&self, fingerprint: Fingerprint, error: Error) -> ComputeOutcome {
        self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint.short(), "Computation failed: {}", error);
        ComputeOutcome::Failed { fingerprint, error }
    }

    /// Remove from both tiers. An in-flight computation is not cancelled and
    /// will still be cached when it completes.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.tier1.remove(fingerprint);
        self.inner.durable_delete(fingerprint);
        debug!(fingerprint = %fingerprint.short(), "Invalidated");
    }

    /// Explicit tier-1 expiry sweep; returns the number of purged entries
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.tier1.purge_expired();
        let count = purged.len();
        self.inner.record_evictions(purged);
        count
    }

    /// Empty tier 1; tier 2 is left alone
    pub fn clear(&self) -> usize {
        self.inner.tier1.clear()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let tier1_hits = c.tier1_hits.load(Ordering::Relaxed);
        let tier2_hits = c.tier2_hits.load(Ordering::Relaxed);
        CacheStats {
            hits: tier1_hits + tier2_hits,
            tier1_hits,
            tier2_hits,
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            tier1_bytes: self.inner.tier1.total_bytes(),
            tier1_entries: self.inner.tier1.len(),
            durable_degraded: self.is_degraded(),
        }
    }

    /// True while tier 2 is being skipped after a failure
    pub fn is_degraded(&self) -> bool {
        self.inner
            .durable
            .as_ref()
            .map(|d| d.degraded.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn tier1(&self) -> &VolatileResultCache {
        &self.inner.tier1
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Stop the work queue; queued computations fail with `QueueClosed`
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("tier1", &self.inner.tier1)
            .field("durable", &self.inner.durable.as_ref().map(|d| d.store.name()))
            .field("queue", &self.queue)
            .finish()
    }
}
