//! Retry logic with exponential backoff
//!
//! [`RetryingExecutor`] hardens an executor against transient failures
//! before it is handed to the queue. The queue itself never retries.

use crate::executor::JobExecutor;
use async_trait::async_trait;
use enrich_foundation::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Initial delay between retries (milliseconds)
    pub initial_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // +/- 20%
            capped_delay * rand::thread_rng().gen_range(0.8..1.2)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Decides whether an error is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Execute an async operation with retry logic
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: &(dyn Fn(&Error) -> bool + Send + Sync),
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => {
                debug!(
                    "{}: non-retryable error on attempt {}: {}",
                    operation_name,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                if attempt >= config.max_retries {
                    warn!(
                        "{}: max retries ({}) exceeded: {}",
                        operation_name, config.max_retries, e
                    );
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{}: attempt {} failed, retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    delay,
                    e
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Executor wrapper that retries its inner executor
pub struct RetryingExecutor<E> {
    inner: E,
    config: RetryConfig,
    should_retry: RetryPredicate,
    name: String,
}

impl<E> RetryingExecutor<E> {
    /// Retries errors for which `Error::is_retryable` holds
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            should_retry: Arc::new(Error::is_retryable),
            name: "retrying".to_string(),
        }
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<T, E> JobExecutor<T> for RetryingExecutor<E>
where
    T: Send + 'static,
    E: JobExecutor<T>,
{
    async fn execute(&self) -> Result<T> {
        with_retry(&self.config, &self.name, &*self.should_retry, || {
            self.inner.execute()
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
