//! Storage module
//!
//! - `db`: SQLite durable tier (result entries, checkpoints)
//! - `memory`: in-process durable tier
//! - `json`: JSON files (configuration)

mod db;
mod json;
mod memory;

pub use db::SqliteStore;
pub use json::JsonStore;
pub use memory::MemoryStore;
