//! enrich-core: Core Runtime for Enrich
//!
//! Layer2 - caching and incremental processing of derived content
//!
//! # Modules
//!
//! - `cache`: tier-1 volatile cache, two-tier `ResultCache`, `MemoCache`
//! - `incremental`: checkpointed delta processing for growing units
//! - `engine`: `EnrichmentEngine` composition root
//!
//! # Example
//!
//! ```ignore
//! use enrich_core::{EnrichmentEngine, UnitItem};
//! use enrich_foundation::EngineConfig;
//!
//! let engine = EnrichmentEngine::new(EngineConfig::default())?;
//!
//! // Full pass over the first ten items
//! let agg = engine
//!     .incremental()
//!     .append_and_process("session-1", first_ten, analyzer.clone())
//!     .await?;
//!
//! // Only the appended items are analyzed
//! let agg = engine
//!     .incremental()
//!     .append_and_process("session-1", next_five, analyzer)
//!     .await?;
//!
//! println!("hit rate: {:.2}", engine.cache().stats().hit_rate());
//! ```

pub mod cache;
pub mod engine;
pub mod incremental;

// Re-exports: Cache
pub use cache::{
    CacheStats, ComputeOutcome, Evicted, InsertOutcome, MemoCache, MemoStats, ResultCache,
    TtlLruCache, VolatileConfig, VolatileResultCache,
};

// Re-exports: Incremental
pub use incremental::{range_fingerprint, DeltaAnalyzer, IncrementalProcessor, UnitItem};

// Re-exports: Engine
pub use engine::EnrichmentEngine;
