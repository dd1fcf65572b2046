//! Job executors
//!
//! - `JobExecutor` - the contract a queue worker invokes
//! - closures returning a future implement it directly

pub mod r#trait;

pub use r#trait::JobExecutor;
