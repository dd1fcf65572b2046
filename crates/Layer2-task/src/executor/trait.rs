//! Executor trait

use async_trait::async_trait;
use enrich_foundation::Result;
use std::future::Future;

/// A single-shot computation run by a queue worker.
///
/// Implementations are expected to carry their own retry policy (see
/// [`RetryingExecutor`](crate::RetryingExecutor)); the queue invokes
/// `execute` at most once per job.
#[async_trait]
pub trait JobExecutor<T>: Send + Sync {
    async fn execute(&self) -> Result<T>;

    /// Executor name, for logs
    fn name(&self) -> &str {
        "executor"
    }
}

/// Any `Fn() -> Future<Output = Result<T>>` closure is an executor
#[async_trait]
impl<T, F, Fut> JobExecutor<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
{
    async fn execute(&self) -> Result<T> {
        (self)().await
    }
}
