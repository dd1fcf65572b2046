//! Event Types - typed events emitted by the cache, queue and checkpoint layers

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event ID
// ============================================================================

/// Unique event ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event Category
// ============================================================================

/// Coarse grouping used by filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Lookups, misses and evictions
    Cache,
    /// Job lifecycle
    Queue,
    /// Incremental checkpoints
    Checkpoint,
    /// Durable tier health
    Store,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::Checkpoint => "checkpoint",
            Self::Store => "store",
        }
    }
}

// ============================================================================
// Event Kind
// ============================================================================

/// Which tier answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Volatile,
    Durable,
}

/// Why an entry left tier 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Byte budget exceeded
    Bytes,
    /// Entry count exceeded
    Capacity,
    /// Older than the TTL
    Expired,
}

/// Event payload, one variant per discrete event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Hit {
        fingerprint: Fingerprint,
        tier: CacheTier,
        latency_us: u64,
    },
    MissStarted {
        fingerprint: Fingerprint,
    },
    MissCoalesced {
        fingerprint: Fingerprint,
    },
    MissCompleted {
        fingerprint: Fingerprint,
        duration_ms: u64,
    },
    MissFailed {
        fingerprint: Fingerprint,
        error: String,
    },
    Eviction {
        fingerprint: Fingerprint,
        size_bytes: u64,
        reason: EvictionReason,
    },
    JobCancelled {
        fingerprint: Fingerprint,
    },
    CheckpointUpdated {
        unit_id: String,
        offset: u64,
        delta_items: u64,
        duration_ms: u64,
    },
    UnitInvalidated {
        unit_id: String,
    },
    StoreDegraded {
        reason: String,
    },
    StoreRecovered,
}

impl EventKind {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Hit { .. }
            | Self::MissStarted { .. }
            | Self::MissCoalesced { .. }
            | Self::MissCompleted { .. }
            | Self::MissFailed { .. }
            | Self::Eviction { .. } => EventCategory::Cache,
            Self::JobCancelled { .. } => EventCategory::Queue,
            Self::CheckpointUpdated { .. } | Self::UnitInvalidated { .. } => {
                EventCategory::Checkpoint
            }
            Self::StoreDegraded { .. } | Self::StoreRecovered => EventCategory::Store,
        }
    }

    /// Short dotted name, e.g. `cache.hit`
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit { .. } => "cache.hit",
            Self::MissStarted { .. } => "cache.miss_started",
            Self::MissCoalesced { .. } => "cache.miss_coalesced",
            Self::MissCompleted { .. } => "cache.miss_completed",
            Self::MissFailed { .. } => "cache.miss_failed",
            Self::Eviction { .. } => "cache.eviction",
            Self::JobCancelled { .. } => "queue.job_cancelled",
            Self::CheckpointUpdated { .. } => "checkpoint.updated",
            Self::UnitInvalidated { .. } => "checkpoint.unit_invalidated",
            Self::StoreDegraded { .. } => "store.degraded",
            Self::StoreRecovered => "store.recovered",
        }
    }

    /// Fingerprint this event is about, if any
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Hit { fingerprint, .. }
            | Self::MissStarted { fingerprint }
            | Self::MissCoalesced { fingerprint }
            | Self::MissCompleted { fingerprint, .. }
            | Self::MissFailed { fingerprint, .. }
            | Self::Eviction { fingerprint, .. }
            | Self::JobCancelled { fingerprint } => Some(fingerprint),
            _ => None,
        }
    }
}

// ============================================================================
// EngineEvent
// ============================================================================

/// Envelope published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintBuilder;

    #[test]
    fn test_categories() {
        let fp = FingerprintBuilder::build("u", "d", "v", "").unwrap();
        assert_eq!(
            EventKind::MissStarted { fingerprint: fp }.category(),
            EventCategory::Cache
        );
        assert_eq!(EventKind::StoreRecovered.category(), EventCategory::Store);
        assert_eq!(
            EventKind::UnitInvalidated {
                unit_id: "u".into()
            }
            .category(),
            EventCategory::Checkpoint
        );
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::new(EventKind::StoreDegraded {
            reason: "disk full".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "store_degraded");
        assert_eq!(value["reason"], "disk full");
    }
}
