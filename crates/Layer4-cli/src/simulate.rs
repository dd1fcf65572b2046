//! Synthetic workload
//!
//! Each unit gets a full pass, then a series of appends. Per-item analysis
//! goes through the memo cache, so items shared between units are analyzed
//! once. Finally every unit's first range is looked up again and a burst of
//! identical summary requests exercises coalescing.

use async_trait::async_trait;
use enrich_core::{
    range_fingerprint, CacheStats, ComputeOutcome, DeltaAnalyzer, EnrichmentEngine, MemoCache,
    MemoStats, UnitItem,
};
use enrich_foundation::{content_digest, EnrichmentResult, Error, FingerprintBuilder, Result};
use enrich_task::{Priority, QueueStats};
use serde::Serialize;
use serde_json::{json, Value};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub units: usize,
    pub items: usize,
    pub appends: usize,
    pub delay: Duration,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub aggregates: Vec<UnitSummary>,
    pub cache: CacheStats,
    pub memo: MemoStats,
    pub queue: QueueStats,
}

#[derive(Debug, Serialize)]
pub struct UnitSummary {
    pub unit_id: String,
    pub offset: u64,
    pub facts: usize,
}

/// Pretends to analyze screenshots; one fact per item
struct SyntheticAnalyzer {
    memo: Arc<MemoCache<String, Value>>,
    delay: Duration,
}

#[async_trait]
impl DeltaAnalyzer for SyntheticAnalyzer {
    fn computation_version(&self) -> &str {
        "synthetic-v1"
    }

    async fn analyze(
        &self,
        unit_id: &str,
        range: Range<u64>,
        items: Vec<UnitItem>,
    ) -> Result<EnrichmentResult> {
        debug!(unit_id, start = range.start, end = range.end, "Analyzing");
        let mut facts = Vec::with_capacity(items.len());
        for item in items {
            let delay = self.delay;
            let digest = item.digest.clone();
            // Memoized by content; only content-derived data goes in
            let analysis = self
                .memo
                .get_or_compute_async(item.digest.clone(), || async move {
                    tokio::time::sleep(delay).await;
                    let label = format!("frame-{}", digest.get(..8).unwrap_or(&digest));
                    json!({ "digest": digest, "label": label })
                })
                .await;
            facts.push(json!({ "item": item.id, "analysis": analysis }));
        }
        Ok(EnrichmentResult::new(json!({ "facts": facts })).with_cost(range.end - range.start))
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

/// Items of a unit. Item contents repeat every ten positions across units,
/// which gives the memo cache something to hit.
fn unit_items(range: Range<u64>) -> Vec<UnitItem> {
    range
        .map(|i| {
            let digest = content_digest(format!("frame-{}", i % 10).as_bytes());
            UnitItem::new(format!("item-{}", i), digest)
        })
        .collect()
}

pub async fn run(
    engine: &EnrichmentEngine,
    options: &SimulationOptions,
) -> anyhow::Result<SimulationReport> {
    let started = Instant::now();
    let analyzer = Arc::new(SyntheticAnalyzer {
        memo: engine.memo(),
        delay: options.delay,
    });
    let incremental = engine.incremental();
    let step = options.items as u64;

    let mut passes = Vec::new();
    for unit in 0..options.units {
        let incremental = incremental.clone();
        let analyzer = analyzer.clone();
        let appends = options.appends as u64;
        passes.push(tokio::spawn(async move {
            let unit_id = format!("unit-{}", unit);
            for round in 0..=appends {
                let items = unit_items(round * step..(round + 1) * step);
                incremental
                    .append_and_process(&unit_id, items, analyzer.clone())
                    .await?;
            }
            Ok::<_, Error>(unit_id)
        }));
    }

    let mut aggregates = Vec::new();
    for pass in futures::future::join_all(passes).await {
        let unit_id = pass??;
        if let Some(checkpoint) = incremental.checkpoint(&unit_id)? {
            aggregates.push(UnitSummary {
                facts: checkpoint.partial_aggregate["facts"]
                    .as_array()
                    .map(Vec::len)
                    .unwrap_or(0),
                offset: checkpoint.last_processed_offset,
                unit_id,
            });
        }
    }

    // Repeated lookups of each unit's first pass are pure hits
    let cache = engine.cache();
    for summary in &aggregates {
        let first = 0..step;
        let items = unit_items(first.clone());
        let fp = range_fingerprint(&summary.unit_id, &first, &items, analyzer.as_ref())?;
        cache.get(&fp);
    }

    // Identical concurrent requests share one computation
    let summary_fp = FingerprintBuilder::build("report", "all-units", "summary-v1", "")?;
    let delay = options.delay;
    let burst = (0..8).map(|_| {
        let cache = cache.clone();
        async move {
            cache
                .resolve(summary_fp, Priority::High, move || async move {
                    tokio::time::sleep(delay * 5).await;
                    Ok::<_, Error>(EnrichmentResult::new(json!({ "summary": true })))
                })
                .await
        }
    });
    let coalesced = futures::future::join_all(burst)
        .await
        .into_iter()
        .filter(|outcome| matches!(outcome, ComputeOutcome::MissCoalesced { .. }))
        .count();
    debug!(coalesced, "Summary burst finished");

    let report = SimulationReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        aggregates,
        cache: cache.stats(),
        memo: engine.memo().stats(),
        queue: cache.queue_stats(),
    };
    info!(
        elapsed_ms = report.elapsed_ms,
        hit_rate = report.cache.hit_rate(),
        "Simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_foundation::EngineConfig;

    #[tokio::test]
    async fn test_simulation_report() {
        let engine = EnrichmentEngine::new(EngineConfig::minimal()).unwrap();
        let options = SimulationOptions {
            units: 2,
            items: 5,
            appends: 2,
            delay: Duration::from_millis(1),
        };

        let report = run(&engine, &options).await.unwrap();
        assert_eq!(report.aggregates.len(), 2);
        for unit in &report.aggregates {
            assert_eq!(unit.offset, 15);
            assert_eq!(unit.facts, 15);
        }
        assert!(report.cache.hits >= 2);
        assert!(report.memo.hits > 0);
        assert_eq!(report.queue.completed, 2 * 3 + 1);
    }

    #[tokio::test]
    async fn test_facts_keep_their_own_item_ids() {
        let engine = EnrichmentEngine::new(EngineConfig::minimal()).unwrap();
        let options = SimulationOptions {
            units: 1,
            items: 15,
            appends: 0,
            delay: Duration::from_millis(0),
        };

        run(&engine, &options).await.unwrap();
        let checkpoint = engine.incremental().checkpoint("unit-0").unwrap().unwrap();
        let facts = checkpoint.partial_aggregate["facts"].as_array().unwrap();
        assert_eq!(facts.len(), 15);

        // item-3 and item-13 share content, so they share the memoized analysis
        assert_eq!(facts[13]["item"], "item-13");
        assert_eq!(facts[3]["item"], "item-3");
        assert_eq!(facts[13]["analysis"], facts[3]["analysis"]);
        assert!(engine.memo().stats().hits >= 5);
    }
}
