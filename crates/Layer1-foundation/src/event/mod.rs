//! Event System
//!
//! The cache, work queue and incremental processor publish typed events for
//! monitoring and UI layers. Delivery is best-effort and never blocks the
//! emitting operation.
//!
//! ```text
//! ResultCache ─┐
//! WorkQueue ───┼──► EventBus (broadcast) ──► subscriber 1 (own queue)
//! Incremental ─┘                        └──► subscriber N (own queue)
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventFilter};
pub use types::{
    CacheTier, EngineEvent, EventCategory, EventId, EventKind, EvictionReason,
};
