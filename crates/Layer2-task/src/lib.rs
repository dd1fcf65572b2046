//! # enrich-task
//!
//! Job execution for Enrich.
//! Turns fingerprinted computations into at most one running job each, on a
//! fixed pool of workers.
//!
//! ## Features
//!
//! - Bounded worker pool; excess submissions queue by priority
//! - Coalescing of duplicate in-flight fingerprints
//! - Per-job timeout and panic isolation
//! - Per-waiter cancellation
//! - Retry/backoff wrapper for executors

pub mod executor;
pub mod queue;
pub mod retry;
pub mod state;
pub mod task;

pub use executor::JobExecutor;
pub use queue::{JobHandle, QueueStats, WorkQueue, WorkQueueConfig};
pub use retry::{with_retry, RetryConfig, RetryPredicate, RetryingExecutor};
pub use state::JobState;
pub use task::{JobId, Priority};
