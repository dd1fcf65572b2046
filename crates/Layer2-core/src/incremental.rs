//! Incremental processing over units that grow by appending items
//!
//! One checkpoint per unit records how many items have been processed and
//! the aggregate so far. An append computes only the new range through the
//! result cache and merges the delta into the stored aggregate. The
//! checkpoint moves only after both the computation and the merge succeed.
//!
//! Calls for the same unit are serialized internally; different units run
//! concurrently.

use crate::cache::ResultCache;
use async_trait::async_trait;
use dashmap::DashMap;
use enrich_foundation::{
    digest_parts, Checkpoint, CheckpointStore, EnrichmentResult, Error, EventBus, EventKind,
    Fingerprint, FingerprintBuilder, Result,
};
use enrich_task::{JobExecutor, Priority, RetryConfig, RetryingExecutor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One raw item of a unit (a screenshot, an audio segment...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitItem {
    pub id: String,
    /// Content digest of the item, computed by the caller
    pub digest: String,
}

impl UnitItem {
    pub fn new(id: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            digest: digest.into(),
        }
    }
}

/// Unit-specific analysis and merge logic
#[async_trait]
pub trait DeltaAnalyzer: Send + Sync + 'static {
    /// Version of the computation; part of every fingerprint
    fn computation_version(&self) -> &str;

    /// Digest of the analysis configuration; empty means defaults
    fn config_digest(&self) -> String {
        String::new()
    }

    /// Analyze `items`, which occupy `range` within the unit
    async fn analyze(
        &self,
        unit_id: &str,
        range: Range<u64>,
        items: Vec<UnitItem>,
    ) -> Result<EnrichmentResult>;

    /// Fold a delta result into the aggregate. Must be associative.
    fn merge(&self, aggregate: &Value, delta: &Value) -> Result<Value>;
}

/// Queue job running one range through an analyzer
struct AnalyzeRange<A> {
    analyzer: Arc<A>,
    unit_id: String,
    range: Range<u64>,
    items: Vec<UnitItem>,
}

#[async_trait]
impl<A: DeltaAnalyzer> JobExecutor<EnrichmentResult> for AnalyzeRange<A> {
    async fn execute(&self) -> Result<EnrichmentResult> {
        self.analyzer
            .analyze(&self.unit_id, self.range.clone(), self.items.clone())
            .await
    }

    fn name(&self) -> &str {
        "delta-analyzer"
    }
}

/// Fingerprint of one processed range of a unit
///
/// The range is part of the identity, so a full pass over `[0..15)` and a
/// delta over `[10..15)` never share an entry.
pub fn range_fingerprint<A: DeltaAnalyzer + ?Sized>(
    unit_id: &str,
    range: &Range<u64>,
    items: &[UnitItem],
    analyzer: &A,
) -> Result<Fingerprint> {
    let identity = format!("{}#{}..{}", unit_id, range.start, range.end);
    let content = digest_parts(items.iter().map(|item| item.digest.as_str()));
    FingerprintBuilder::build(
        &identity,
        &content,
        analyzer.computation_version(),
        &analyzer.config_digest(),
    )
}

/// Checkpointed delta processing on top of the result cache
pub struct IncrementalProcessor {
    cache: Arc<ResultCache>,
    store: Option<Arc<dyn CheckpointStore>>,
    checkpoints: DashMap<String, Checkpoint>,
    unit_locks: DashMap<String, Arc<Mutex<()>>>,
    events: Arc<EventBus>,
    priority: Priority,
    retry: RetryConfig,
}

impl IncrementalProcessor {
    pub fn new(cache: Arc<ResultCache>, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        let events = Arc::clone(cache.events());
        Self {
            cache,
            store,
            checkpoints: DashMap::new(),
            unit_locks: DashMap::new(),
            events,
            priority: Priority::Normal,
            retry: RetryConfig::no_retry(),
        }
    }

    /// Queue priority for the computations this processor submits
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Retry policy wrapped around every analyzer call
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Process newly appended items and return the merged aggregate.
    ///
    /// Without a checkpoint the items are the whole unit (offset 0). With one
    /// they are appended after `last_processed_offset`.
    pub async fn append_and_process<A: DeltaAnalyzer>(
        &self,
        unit_id: &str,
        items: Vec<UnitItem>,
        analyzer: Arc<A>,
    ) -> Result<Value> {
        if unit_id.trim().is_empty() {
            return Err(Error::InvalidInput("unit id must not be empty".into()));
        }

        let lock = self.unit_lock(unit_id);
        let _guard = lock.lock().await;

        let current = self.load(unit_id)?;
        if items.is_empty() {
            return match current {
                Some(checkpoint) => Ok(checkpoint.partial_aggregate),
                None => Err(Error::InvalidInput(format!(
                    "no items to process for new unit '{}'",
                    unit_id
                ))),
            };
        }

        let started = Instant::now();
        let delta_items = items.len() as u64;
        let start = current
            .as_ref()
            .map(|c| c.last_processed_offset)
            .unwrap_or(0);
        let range = start..start + delta_items;
        let fingerprint = range_fingerprint(unit_id, &range, &items, analyzer.as_ref())?;

        debug!(
            unit_id,
            fingerprint = %fingerprint.short(),
            start = range.start,
            end = range.end,
            delta = current.is_some(),
            "Processing unit range"
        );

        let job = RetryingExecutor::new(
            AnalyzeRange {
                analyzer: Arc::clone(&analyzer),
                unit_id: unit_id.to_string(),
                range: range.clone(),
                items,
            },
            self.retry.clone(),
        )
        .with_name("delta-analyzer");
        let entry = self
            .cache
            .get_or_compute(fingerprint, self.priority, job)
            .await?;

        let next = match &current {
            Some(checkpoint) => {
                let merged = analyzer.merge(&checkpoint.partial_aggregate, entry.payload())?;
                checkpoint.advance(delta_items, merged)
            }
            None => Checkpoint::new(unit_id, range.end, entry.payload().clone()),
        };

        self.persist(&next);
        let aggregate = next.partial_aggregate.clone();
        let offset = next.last_processed_offset;
        self.checkpoints.insert(unit_id.to_string(), next);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(unit_id, offset, delta_items, duration_ms, "Checkpoint updated");
        self.events.publish(EventKind::CheckpointUpdated {
            unit_id: unit_id.to_string(),
            offset,
            delta_items,
            duration_ms,
        });

        Ok(aggregate)
    }

    /// Current checkpoint for a unit, if any
    pub fn checkpoint(&self, unit_id: &str) -> Result<Option<Checkpoint>> {
        self.load(unit_id)
    }

    /// Drop a unit's checkpoint; the next append recomputes from offset 0
    pub async fn invalidate_unit(&self, unit_id: &str) -> Result<bool> {
        let lock = self.unit_lock(unit_id);
        let _guard = lock.lock().await;

        let mut removed = self.checkpoints.remove(unit_id).is_some();
        if let Some(store) = &self.store {
            removed |= store.delete(unit_id)?;
        }

        if removed {
            info!(unit_id, "Unit invalidated");
            self.events.publish(EventKind::UnitInvalidated {
                unit_id: unit_id.to_string(),
            });
        }

        // Map entry plus our clone; anyone else waiting keeps it alive
        self.unit_locks
            .remove_if(unit_id, |_, l| Arc::strong_count(l) <= 2);
        Ok(removed)
    }

    /// Units with a checkpoint loaded in memory
    pub fn tracked_units(&self) -> Vec<String> {
        self.checkpoints.iter().map(|e| e.key().clone()).collect()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    fn unit_lock(&self, unit_id: &str) -> Arc<Mutex<()>> {
        self.unit_locks
            .entry(unit_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Memory first, then the store. A store error is returned rather than
    /// treated as "no checkpoint", which would restart the unit at offset 0.
    fn load(&self, unit_id: &str) -> Result<Option<Checkpoint>> {
        if let Some(found) = self.checkpoints.get(unit_id) {
            return Ok(Some(found.clone()));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        let loaded = store.load(unit_id)?;
        if let Some(checkpoint) = &loaded {
            debug!(
                unit_id,
                offset = checkpoint.last_processed_offset,
                "Checkpoint reloaded from store"
            );
            self.checkpoints
                .insert(unit_id.to_string(), checkpoint.clone());
        }
        Ok(loaded)
    }

    /// Write-through; the in-memory checkpoint stays authoritative if the
    /// store is down
    fn persist(&self, checkpoint: &Checkpoint) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(checkpoint) {
                warn!(
                    unit_id = %checkpoint.unit_id,
                    "Failed to persist checkpoint: {}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for IncrementalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalProcessor")
            .field("units", &self.checkpoints.len())
            .field("priority", &self.priority)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VolatileConfig;
    use enrich_foundation::MemoryStore;
    use enrich_task::WorkQueueConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Counts items and sums their ids
    struct Counter {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DeltaAnalyzer for Counter {
        fn computation_version(&self) -> &str {
            "count-v1"
        }

        async fn analyze(
            &self,
            _unit_id: &str,
            range: Range<u64>,
            items: Vec<UnitItem>,
        ) -> Result<EnrichmentResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EnrichmentResult::new(json!({
                "count": items.len(),
                "end": range.end,
            })))
        }

        fn merge(&self, aggregate: &Value, delta: &Value) -> Result<Value> {
            let count =
                aggregate["count"].as_u64().unwrap_or(0) + delta["count"].as_u64().unwrap_or(0);
            Ok(json!({ "count": count, "end": delta["end"] }))
        }
    }

    fn items(range: Range<u64>) -> Vec<UnitItem> {
        range
            .map(|i| UnitItem::new(format!("item-{}", i), format!("digest-{}", i)))
            .collect()
    }

    fn processor(store: Option<Arc<dyn CheckpointStore>>) -> IncrementalProcessor {
        let cache = ResultCache::with_parts(
            VolatileConfig::default(),
            WorkQueueConfig::default(),
            None,
            Duration::from_secs(30),
            Arc::new(EventBus::new()),
        );
        IncrementalProcessor::new(Arc::new(cache), store)
    }

    #[tokio::test]
    async fn test_full_then_delta() {
        let incr = processor(None);
        let analyzer = Arc::new(Counter {
            calls: AtomicU32::new(0),
        });

        let agg = incr
            .append_and_process("u1", items(0..10), analyzer.clone())
            .await
            .unwrap();
        assert_eq!(agg["count"], 10);

        let agg = incr
            .append_and_process("u1", items(10..15), analyzer.clone())
            .await
            .unwrap();
        assert_eq!(agg["count"], 15);
        assert_eq!(agg["end"], 15);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);

        let checkpoint = incr.checkpoint("u1").unwrap().unwrap();
        assert_eq!(checkpoint.last_processed_offset, 15);
    }

    #[tokio::test]
    async fn test_empty_append() {
        let incr = processor(None);
        let analyzer = Arc::new(Counter {
            calls: AtomicU32::new(0),
        });

        let err = incr
            .append_and_process("fresh", Vec::new(), analyzer.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        incr.append_and_process("u2", items(0..3), analyzer.clone())
            .await
            .unwrap();
        let agg = incr
            .append_and_process("u2", Vec::new(), analyzer.clone())
            .await
            .unwrap();
        assert_eq!(agg["count"], 3);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_full_pass() {
        let incr = processor(None);
        let analyzer = Arc::new(Counter {
            calls: AtomicU32::new(0),
        });
        let mut events = incr.cache().events().subscribe();

        incr.append_and_process("u3", items(0..4), analyzer.clone())
            .await
            .unwrap();
        assert!(incr.invalidate_unit("u3").await.unwrap());
        assert!(incr.checkpoint("u3").unwrap().is_none());
        assert!(!incr.invalidate_unit("u3").await.unwrap());

        let mut saw_invalidated = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, EventKind::UnitInvalidated { .. }) {
                saw_invalidated = true;
            }
        }
        assert!(saw_invalidated);
    }

    #[tokio::test]
    async fn test_invalidate_releases_unit_lock() {
        let incr = processor(None);
        let analyzer = Arc::new(Counter {
            calls: AtomicU32::new(0),
        });

        for unit in ["a", "b"] {
            incr.append_and_process(unit, items(0..2), analyzer.clone())
                .await
                .unwrap();
        }
        assert_eq!(incr.unit_locks.len(), 2);

        incr.invalidate_unit("a").await.unwrap();
        assert!(!incr.unit_locks.contains_key("a"));
        assert!(incr.unit_locks.contains_key("b"));

        // Invalidating an unknown unit leaves nothing behind either
        incr.invalidate_unit("ghost").await.unwrap();
        assert_eq!(incr.unit_locks.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_reloaded_from_store() {
        let store = Arc::new(MemoryStore::new());
        let analyzer = Arc::new(Counter {
            calls: AtomicU32::new(0),
        });

        {
            let incr = processor(Some(store.clone()));
            incr.append_and_process("u4", items(0..6), analyzer.clone())
                .await
                .unwrap();
        }

        let incr = processor(Some(store.clone()));
        let agg = incr
            .append_and_process("u4", items(6..8), analyzer.clone())
            .await
            .unwrap();
        assert_eq!(agg["count"], 8);
        assert_eq!(
            CheckpointStore::load(store.as_ref(), "u4")
                .unwrap()
                .unwrap()
                .last_processed_offset,
            8
        );
    }

    #[test]
    fn test_range_in_fingerprint() {
        let analyzer = Counter {
            calls: AtomicU32::new(0),
        };
        let tail = items(10..15);
        let a = range_fingerprint("u", &(10..15), &tail, &analyzer).unwrap();
        let b = range_fingerprint("u", &(0..5), &tail, &analyzer).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            a,
            range_fingerprint("u", &(10..15), &tail, &analyzer).unwrap()
        );
    }
}
