//! Engine Config - construction-time settings for every component
//!
//! Settings are read once when the engine is built. Changing budgets or the
//! worker count means building a new engine.

use crate::event::EventBusConfig;
use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside a JsonStore directory
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

// ============================================================================
// EngineConfig
// ============================================================================

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub result_cache: ResultCacheConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub memo: MemoConfig,

    #[serde(default)]
    pub durable: DurableConfig,

    #[serde(default)]
    pub events: EventConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small footprint: tight budgets, two workers
    pub fn minimal() -> Self {
        Self {
            result_cache: ResultCacheConfig {
                max_bytes: 8 * 1024 * 1024,
                max_entries: 1000,
                ttl_secs: 600,
            },
            queue: QueueConfig {
                max_concurrency: 2,
                job_timeout_secs: 120,
            },
            memo: MemoConfig {
                max_entries: 512,
                ttl_secs: 600,
            },
            durable: DurableConfig::default(),
            events: EventConfig {
                channel_capacity: 256,
                history_size: 20,
            },
        }
    }

    /// Large budgets and more workers
    pub fn performance() -> Self {
        Self {
            result_cache: ResultCacheConfig {
                max_bytes: 512 * 1024 * 1024,
                max_entries: 100_000,
                ttl_secs: 4 * 3600,
            },
            queue: QueueConfig {
                max_concurrency: 16,
                job_timeout_secs: 600,
            },
            memo: MemoConfig {
                max_entries: 32_768,
                ttl_secs: 3600,
            },
            durable: DurableConfig::default(),
            events: EventConfig {
                channel_capacity: 4096,
                history_size: 500,
            },
        }
    }

    /// Builder-style durable path
    pub fn with_durable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.durable.path = Some(path.into());
        self
    }

    /// Reject values that would make a component unusable
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 7] = [
            ("result_cache.max_bytes", self.result_cache.max_bytes),
            ("result_cache.max_entries", self.result_cache.max_entries as u64),
            ("result_cache.ttl_secs", self.result_cache.ttl_secs),
            ("queue.max_concurrency", self.queue.max_concurrency as u64),
            ("queue.job_timeout_secs", self.queue.job_timeout_secs),
            ("memo.max_entries", self.memo.max_entries as u64),
            ("events.channel_capacity", self.events.channel_capacity as u64),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", field)));
            }
        }

        Ok(())
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Read and validate a JSON config file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (dir, file) = split_path(path)?;
        let config: Self = JsonStore::new(dir).load(&file)?;
        config.validate()?;
        Ok(config)
    }

    /// Global config (`<config dir>/enrich/engine.json`), defaults when absent
    pub fn load_global() -> Result<Self> {
        let store = JsonStore::global()?;
        let config = store
            .load_optional::<Self>(ENGINE_CONFIG_FILE)?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let (dir, file) = split_path(path.as_ref())?;
        JsonStore::new(dir).save(&file, self)
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, String)> {
    let file = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, file.to_string()))
}

// ============================================================================
// Sections
// ============================================================================

/// Tier-1 bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCacheConfig {
    /// Byte budget for tier 1
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Entry cap for tier 1
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Tier-1 time-to-live
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl ResultCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Executor time limit per job
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_job_timeout_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Sub-computation memoization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoConfig {
    #[serde(default = "default_memo_entries")]
    pub max_entries: usize,

    #[serde(default = "default_memo_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_memo_entries() -> usize {
    4096
}

fn default_memo_ttl_secs() -> u64 {
    1800
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            max_entries: default_memo_entries(),
            ttl_secs: default_memo_ttl_secs(),
        }
    }
}

impl MemoConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Tier-2 settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableConfig {
    /// SQLite file; volatile only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Seconds tier 2 is skipped after a failure
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_retry_after_secs() -> u64 {
    30
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: None,
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl DurableConfig {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

/// Event bus sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_history_size() -> usize {
    100
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            history_size: default_history_size(),
        }
    }
}

impl From<&EventConfig> for EventBusConfig {
    fn from(config: &EventConfig) -> Self {
        EventBusConfig {
            channel_capacity: config.channel_capacity,
            history_size: config.history_size,
        }
    }
}
