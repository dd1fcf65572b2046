//! End-to-end behaviour of the cache, queue and incremental processor

use async_trait::async_trait;
use enrich_core::{
    DeltaAnalyzer, EnrichmentEngine, ResultCache, UnitItem, VolatileConfig,
};
use enrich_foundation::{
    CheckpointStore, DurableStore, EngineConfig, EnrichmentResult, Error, EventBus, EventKind,
    Fingerprint, FingerprintBuilder, MemoryStore, Result,
};
use enrich_task::{Priority, WorkQueueConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MB: u64 = 1024 * 1024;

fn fp(name: &str) -> Fingerprint {
    FingerprintBuilder::build(name, "content", "v1", "").unwrap()
}

fn cache(max_bytes: u64, durable: Option<Arc<dyn DurableStore>>) -> ResultCache {
    ResultCache::with_parts(
        VolatileConfig {
            max_bytes,
            max_entries: 1000,
            ttl: Duration::from_secs(60),
        },
        WorkQueueConfig {
            max_concurrency: 4,
            job_timeout: Duration::from_secs(10),
        },
        durable,
        Duration::from_secs(30),
        Arc::new(EventBus::new()),
    )
}

/// Records every analyzed range; fails ranges starting at `fail_from`
struct RecordingAnalyzer {
    ranges: Mutex<Vec<Range<u64>>>,
    fail_from: Option<u64>,
}

impl RecordingAnalyzer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ranges: Mutex::new(Vec::new()),
            fail_from: None,
        })
    }

    fn failing_from(offset: u64) -> Arc<Self> {
        Arc::new(Self {
            ranges: Mutex::new(Vec::new()),
            fail_from: Some(offset),
        })
    }

    fn ranges(&self) -> Vec<Range<u64>> {
        self.ranges.lock().clone()
    }
}

#[async_trait]
impl DeltaAnalyzer for RecordingAnalyzer {
    fn computation_version(&self) -> &str {
        "facts-v1"
    }

    async fn analyze(
        &self,
        unit_id: &str,
        range: Range<u64>,
        items: Vec<UnitItem>,
    ) -> Result<EnrichmentResult> {
        self.ranges.lock().push(range.clone());
        if self.fail_from.is_some_and(|from| range.start >= from) {
            return Err(Error::executor(unit_id, "analysis backend rejected request"));
        }
        let facts: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        Ok(EnrichmentResult::new(json!({ "facts": facts })))
    }

    fn merge(&self, aggregate: &Value, delta: &Value) -> Result<Value> {
        let mut facts = aggregate["facts"]
            .as_array()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("aggregate has no facts".into()))?;
        facts.extend(delta["facts"].as_array().cloned().unwrap_or_default());
        Ok(json!({ "facts": facts }))
    }
}

fn items(range: Range<u64>) -> Vec<UnitItem> {
    range
        .map(|i| UnitItem::new(format!("shot-{}", i), format!("sha-{}", i)))
        .collect()
}

#[tokio::test]
async fn cold_miss_then_hit() {
    let cache = cache(10 * MB, None);
    let calls = Arc::new(AtomicU32::new(0));

    let executor = {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, Error>(EnrichmentResult::new(json!({"value": "A"})).with_size(1000))
            }
        }
    };

    let first = cache
        .get_or_compute(fp("fp1"), Priority::Normal, executor.clone())
        .await
        .unwrap();
    assert_eq!(first.payload()["value"], "A");
    assert_eq!(cache.stats().misses, 1);

    let started = Instant::now();
    let second = cache
        .get_or_compute(fp("fp1"), Priority::Normal, executor)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(second.payload()["value"], "A");

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_coalesce() {
    let cache = Arc::new(cache(10 * MB, None));
    let calls = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        let calls = calls.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute(fp("fp2"), Priority::Normal, move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, Error>(EnrichmentResult::new(json!("B")))
                    }
                })
                .await
        }));
    }

    for result in futures::future::join_all(tasks).await {
        let entry = result.unwrap().unwrap();
        assert_eq!(entry.payload(), &json!("B"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().coalesced, 19);
}

#[tokio::test]
async fn incremental_append_computes_only_delta() {
    let engine = EnrichmentEngine::new(EngineConfig::minimal()).unwrap();
    let incremental = engine.incremental();
    let analyzer = RecordingAnalyzer::new();

    let agg0 = incremental
        .append_and_process("u1", items(0..10), analyzer.clone())
        .await
        .unwrap();
    assert_eq!(agg0["facts"].as_array().unwrap().len(), 10);

    let agg1 = incremental
        .append_and_process("u1", items(10..15), analyzer.clone())
        .await
        .unwrap();
    let facts = agg1["facts"].as_array().unwrap();
    assert_eq!(facts.len(), 15);
    assert_eq!(facts[14], "shot-14");

    assert_eq!(analyzer.ranges(), vec![0..10, 10..15]);
    let checkpoint = incremental.checkpoint("u1").unwrap().unwrap();
    assert_eq!(checkpoint.last_processed_offset, 15);
}

#[tokio::test]
async fn failed_delta_leaves_checkpoint() {
    let engine = EnrichmentEngine::new(EngineConfig::minimal()).unwrap();
    let incremental = engine.incremental();

    incremental
        .append_and_process("u2", items(0..10), RecordingAnalyzer::new())
        .await
        .unwrap();

    let err = incremental
        .append_and_process("u2", items(10..12), RecordingAnalyzer::failing_from(10))
        .await
        .unwrap_err();
    assert!(err.is_executor_failure());
    let checkpoint = incremental.checkpoint("u2").unwrap().unwrap();
    assert_eq!(checkpoint.last_processed_offset, 10);

    // Retrying the same append is safe
    let agg = incremental
        .append_and_process("u2", items(10..12), RecordingAnalyzer::new())
        .await
        .unwrap();
    assert_eq!(agg["facts"].as_array().unwrap().len(), 12);
    assert_eq!(
        incremental
            .checkpoint("u2")
            .unwrap()
            .unwrap()
            .last_processed_offset,
        12
    );
}

#[tokio::test]
async fn eviction_follows_access_order() {
    let cache = cache(10 * MB, None);
    let mut events = cache.events().subscribe();

    let put = |name: &'static str| {
        cache.get_or_compute(fp(name), Priority::Normal, || async {
            Ok::<_, Error>(EnrichmentResult::new(json!(null)).with_size(3 * MB))
        })
    };

    put("e1").await.unwrap();
    put("e2").await.unwrap();
    put("e3").await.unwrap();
    put("e4").await.unwrap();
    assert!(cache.get(&fp("e2")).is_some());
    put("e5").await.unwrap();

    let tier1 = cache.tier1();
    assert!(!tier1.contains(&fp("e1")));
    assert!(!tier1.contains(&fp("e3")));
    assert!(tier1.contains(&fp("e2")));
    assert!(tier1.contains(&fp("e4")));
    assert!(tier1.contains(&fp("e5")));
    assert!(tier1.total_bytes() <= 10 * MB);

    let mut evicted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventKind::Eviction { fingerprint, .. } = event.kind {
            evicted.push(fingerprint);
        }
    }
    assert_eq!(evicted, vec![fp("e1"), fp("e3")]);
}

#[tokio::test]
async fn tier1_stays_within_budget() {
    let cache = ResultCache::with_parts(
        VolatileConfig {
            max_bytes: 4096,
            max_entries: 8,
            ttl: Duration::from_secs(60),
        },
        WorkQueueConfig::default(),
        None,
        Duration::from_secs(30),
        Arc::new(EventBus::new()),
    );

    for i in 0..64u64 {
        let size = 100 + (i * 397) % 1500;
        cache
            .get_or_compute(fp(&format!("k{}", i)), Priority::Low, move || async move {
                Ok::<_, Error>(EnrichmentResult::new(json!(i)).with_size(size))
            })
            .await
            .unwrap();

        let stats = cache.stats();
        assert!(stats.tier1_bytes <= 4096, "bytes over budget at {}", i);
        assert!(stats.tier1_entries <= 8, "entries over budget at {}", i);
    }
    assert!(cache.stats().evictions > 0);
}

#[tokio::test]
async fn store_outage_degrades_to_volatile() {
    let store = Arc::new(MemoryStore::new());
    let engine =
        EnrichmentEngine::with_stores(EngineConfig::minimal(), Some(store.clone()), None).unwrap();
    let cache = engine.cache();

    store.set_available(false);
    let entry = cache
        .get_or_compute(fp("down"), Priority::Normal, || async {
            Ok::<_, Error>(EnrichmentResult::new(json!("still works")))
        })
        .await
        .unwrap();
    assert_eq!(entry.payload(), &json!("still works"));
    assert!(cache.stats().durable_degraded);
    assert!(cache.get(&fp("down")).is_some());

    let degraded = engine
        .events()
        .history(None)
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::StoreDegraded { .. }))
        .count();
    assert_eq!(degraded, 1);
}

#[tokio::test]
async fn sqlite_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::minimal().with_durable_path(dir.path().join("enrich.db"));
    let analyzer = RecordingAnalyzer::new();

    {
        let engine = EnrichmentEngine::new(config.clone()).unwrap();
        engine
            .cache()
            .get_or_compute(fp("kept"), Priority::Normal, || async {
                Ok::<_, Error>(EnrichmentResult::new(json!({"kept": true})))
            })
            .await
            .unwrap();
        engine
            .incremental()
            .append_and_process("u3", items(0..4), analyzer.clone())
            .await
            .unwrap();
        engine.shutdown().await;
    }

    let engine = EnrichmentEngine::new(config).unwrap();
    let cache = engine.cache();
    let entry = cache.get(&fp("kept")).unwrap();
    assert_eq!(entry.payload()["kept"], true);
    assert_eq!(cache.stats().tier2_hits, 1);

    let agg = engine
        .incremental()
        .append_and_process("u3", items(4..6), analyzer.clone())
        .await
        .unwrap();
    assert_eq!(agg["facts"].as_array().unwrap().len(), 6);
    assert_eq!(analyzer.ranges(), vec![0..4, 4..6]);
}

#[tokio::test]
async fn checkpoint_store_is_written_through() {
    let store = Arc::new(MemoryStore::new());
    let engine =
        EnrichmentEngine::with_stores(EngineConfig::minimal(), None, Some(store.clone())).unwrap();

    engine
        .incremental()
        .append_and_process("u4", items(0..3), RecordingAnalyzer::new())
        .await
        .unwrap();

    let saved = CheckpointStore::load(store.as_ref(), "u4").unwrap().unwrap();
    assert_eq!(saved.last_processed_offset, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_to_one_unit_are_serialized() {
    let engine = EnrichmentEngine::new(EngineConfig::minimal()).unwrap();
    let incremental = engine.incremental();
    let analyzer = RecordingAnalyzer::new();

    incremental
        .append_and_process("u5", items(0..2), analyzer.clone())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let incremental = incremental.clone();
        let analyzer = analyzer.clone();
        tasks.push(tokio::spawn(async move {
            incremental
                .append_and_process("u5", items(100 + i..101 + i), analyzer)
                .await
        }));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let checkpoint = incremental.checkpoint("u5").unwrap().unwrap();
    assert_eq!(checkpoint.last_processed_offset, 10);
    let facts = checkpoint.partial_aggregate["facts"].as_array().unwrap().clone();
    assert_eq!(facts.len(), 10);
    for i in 100..108 {
        assert!(facts.contains(&json!(format!("shot-{}", i))));
    }

    // Every delta got its own offset; none overlapped
    let mut deltas: Vec<Range<u64>> = analyzer.ranges().into_iter().skip(1).collect();
    deltas.sort_by_key(|r| r.start);
    let expected: Vec<Range<u64>> = (2..10).map(|start| start..start + 1).collect();
    assert_eq!(deltas, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_does_not_cancel_in_flight_computation() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(cache(10 * MB, Some(store.clone())));
    let started = Arc::new(tokio::sync::Notify::new());

    let task = {
        let cache = cache.clone();
        let started = started.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(fp("late"), Priority::Normal, move || {
                    let started = started.clone();
                    async move {
                        started.notify_one();
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, Error>(EnrichmentResult::new(json!("LATE")))
                    }
                })
                .await
        })
    };

    started.notified().await;
    cache.invalidate(&fp("late"));
    assert!(cache.get(&fp("late")).is_none());

    let entry = task.await.unwrap().unwrap();
    assert_eq!(entry.payload(), &json!("LATE"));

    // The late result is still written through both tiers
    assert_eq!(cache.get(&fp("late")).unwrap().payload(), &json!("LATE"));
    assert!(store.get(&fp("late")).unwrap().is_some());
}
