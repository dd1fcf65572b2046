//! EnrichmentEngine - composition root
//!
//! Builds every component once from an `EngineConfig` and hands out shared
//! handles. Construct it inside a Tokio runtime; the work queue spawns its
//! workers immediately.

use crate::cache::{MemoCache, ResultCache};
use crate::incremental::IncrementalProcessor;
use enrich_foundation::{
    CheckpointStore, DurableStore, EngineConfig, EventBus, EventBusConfig, Result, SqliteStore,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub struct EnrichmentEngine {
    config: EngineConfig,
    events: Arc<EventBus>,
    cache: Arc<ResultCache>,
    memo: Arc<MemoCache<String, Value>>,
    incremental: Arc<IncrementalProcessor>,
}

impl EnrichmentEngine {
    /// Opens the SQLite store when `durable.path` is set; volatile-only
    /// otherwise
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let sqlite = match &config.durable.path {
            Some(path) => {
                info!(path = %path.display(), "Opening durable store");
                Some(Arc::new(SqliteStore::open(path)?))
            }
            None => None,
        };

        let durable = sqlite
            .clone()
            .map(|store| store as Arc<dyn DurableStore>);
        let checkpoints = sqlite.map(|store| store as Arc<dyn CheckpointStore>);
        Self::with_stores(config, durable, checkpoints)
    }

    /// Build around caller-supplied stores
    pub fn with_stores(
        config: EngineConfig,
        durable: Option<Arc<dyn DurableStore>>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::with_config(EventBusConfig::from(&config.events)));
        let cache = Arc::new(ResultCache::new(&config, durable, Arc::clone(&events)));
        let memo = Arc::new(MemoCache::from_config(&config.memo));
        let incremental = Arc::new(IncrementalProcessor::new(Arc::clone(&cache), checkpoints));

        info!(
            max_bytes = config.result_cache.max_bytes,
            max_entries = config.result_cache.max_entries,
            max_concurrency = config.queue.max_concurrency,
            "Enrichment engine ready"
        );

        Ok(Self {
            config,
            events,
            cache,
            memo,
            incremental,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    /// Memo cache for sub-analyses shared across units
    pub fn memo(&self) -> Arc<MemoCache<String, Value>> {
        Arc::clone(&self.memo)
    }

    pub fn incremental(&self) -> Arc<IncrementalProcessor> {
        Arc::clone(&self.incremental)
    }

    /// Stop the work queue; queued computations fail with `QueueClosed`
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        info!("Enrichment engine stopped");
    }
}

impl std::fmt::Debug for EnrichmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentEngine")
            .field("cache", &self.cache)
            .field("incremental", &self.incremental)
            .finish()
    }
}
