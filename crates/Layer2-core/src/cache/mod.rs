//! Caching layers
//!
//! - `volatile`: tier 1, byte and entry bounded, TTL, LRU eviction
//! - `result`: tier 1 + durable tier 2 with coalesced computation
//! - `memo`: small keyed cache for pure sub-computations
//! - `lru`: TTL-aware LRU map backing `memo`

mod lru;
mod memo;
mod result;
mod volatile;

pub use lru::TtlLruCache;
pub use memo::{MemoCache, MemoStats};
pub use result::{CacheStats, ComputeOutcome, ResultCache};
pub use volatile::{Evicted, InsertOutcome, VolatileConfig, VolatileResultCache};
