//! Core Types - shared across every layer

use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// EnrichmentResult - what an executor produces
// ============================================================================

/// Output of one derived-content computation
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    /// Derived content
    pub payload: Value,
    /// Bytes charged against the tier-1 budget
    pub size_bytes: u64,
    /// Opaque cost units (tokens, credits...) spent producing it
    pub cost_units: u64,
}

impl EnrichmentResult {
    /// Size is taken from the serialized payload
    pub fn new(payload: Value) -> Self {
        let size_bytes = serde_json::to_vec(&payload)
            .map(|v| v.len() as u64)
            .unwrap_or(0);
        Self {
            payload,
            size_bytes,
            cost_units: 0,
        }
    }

    /// Override the accounted size
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_cost(mut self, cost_units: u64) -> Self {
        self.cost_units = cost_units;
        self
    }
}

// ============================================================================
// CacheEntry - one stored result
// ============================================================================

/// A stored result. The payload never changes after creation; only the
/// access bookkeeping does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: Arc<Value>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub cost_units: u64,
    pub compute_duration_ms: u64,
}

impl CacheEntry {
    /// Build a fresh entry from a completed computation
    pub fn from_result(
        fingerprint: Fingerprint,
        result: EnrichmentResult,
        compute_duration_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            payload: Arc::new(result.payload),
            size_bytes: result.size_bytes,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            cost_units: result.cost_units,
            compute_duration_ms,
        }
    }

    /// Payload as a shared value
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

// ============================================================================
// Checkpoint - progress marker for a growing unit
// ============================================================================

/// How much of a unit has been processed, and the aggregate so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub unit_id: String,
    pub last_processed_offset: u64,
    pub partial_aggregate: Value,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(unit_id: impl Into<String>, offset: u64, aggregate: Value) -> Self {
        Self {
            unit_id: unit_id.into(),
            last_processed_offset: offset,
            partial_aggregate: aggregate,
            updated_at: Utc::now(),
        }
    }

    /// Next checkpoint after merging a delta; offsets only move forward
    pub fn advance(&self, delta_items: u64, aggregate: Value) -> Self {
        Self {
            unit_id: self.unit_id.clone(),
            last_processed_offset: self.last_processed_offset + delta_items,
            partial_aggregate: aggregate,
            updated_at: Utc::now(),
        }
    }
}
