//! Config - engine configuration
//!
//! - `engine.rs` - EngineConfig and its sections

mod engine;

pub use engine::{
    DurableConfig, EngineConfig, EventConfig, MemoConfig, QueueConfig, ResultCacheConfig,
    ENGINE_CONFIG_FILE,
};
