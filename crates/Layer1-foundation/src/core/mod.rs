//! Core Module - shared data types and storage traits
//!
//! - `types.rs`: EnrichmentResult, CacheEntry, Checkpoint
//! - `traits.rs`: DurableStore, CheckpointStore

pub mod traits;
pub mod types;

pub use traits::{CheckpointStore, DurableStore};
pub use types::{CacheEntry, Checkpoint, EnrichmentResult};
