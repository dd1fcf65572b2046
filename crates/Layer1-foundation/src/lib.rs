//! # enrich-foundation
//!
//! Foundation layer for Enrich:
//! - Error: crate-wide error type
//! - Fingerprint: stable identifiers for cacheable work
//! - Core: CacheEntry, Checkpoint and the durable-store traits
//! - Event: typed, non-blocking event bus
//! - Storage: SQLite durable tier, in-memory tier, JSON config files
//! - Config: EngineConfig
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  enrich-core (ResultCache, Incremental, Memo)        │
//! │  enrich-task (WorkQueue, retry)                      │
//! │                     │                                │
//! │                     ▼                                │
//! │  Fingerprint ─ EventBus ─ EngineConfig               │
//! │                     │                                │
//! │          ┌──────────┴──────────┐                     │
//! │          ▼                     ▼                     │
//! │    SqliteStore           MemoryStore                 │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Fingerprint
// ============================================================================
pub use fingerprint::{config_digest, content_digest, digest_parts, Fingerprint, FingerprintBuilder};

// ============================================================================
// Core
// ============================================================================
pub use core::{CacheEntry, Checkpoint, CheckpointStore, DurableStore, EnrichmentResult};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    DurableConfig, EngineConfig, EventConfig, MemoConfig, QueueConfig, ResultCacheConfig,
    ENGINE_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, MemoryStore, SqliteStore};

// ============================================================================
// Event
// ============================================================================
pub use event::{
    CacheTier, EngineEvent, EventBus, EventBusConfig, EventCategory, EventFilter, EventId,
    EventKind, EvictionReason,
};
