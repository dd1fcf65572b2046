//! In-process durable store
//!
//! Used when no database path is configured, and in tests. `set_available`
//! switches the store into a failing mode so callers can exercise their
//! degradation paths.

use crate::core::{CacheEntry, Checkpoint, CheckpointStore, DurableStore};
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// HashMap-backed store for result entries and checkpoints
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    available: AtomicBool,
    operations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            operations: AtomicU64::new(0),
        }
    }

    /// Toggle availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of calls that reached the store, failed or not
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        self.check()?;
        Ok(self.entries.read().get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        self.entries.write().insert(*fingerprint, entry.clone());
        Ok(())
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        self.check()?;
        Ok(self.entries.write().remove(fingerprint).is_some())
    }

    fn len(&self) -> Result<usize> {
        self.check()?;
        Ok(self.entries.read().len())
    }

    fn clear(&self) -> Result<usize> {
        self.check()?;
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

impl CheckpointStore for MemoryStore {
    fn load(&self, unit_id: &str) -> Result<Option<Checkpoint>> {
        self.check()?;
        Ok(self.checkpoints.read().get(unit_id).cloned())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.check()?;
        let mut checkpoints = self.checkpoints.write();
        let stale = checkpoints
            .get(&checkpoint.unit_id)
            .map(|cp| cp.last_processed_offset > checkpoint.last_processed_offset)
            .unwrap_or(false);
        if !stale {
            checkpoints.insert(checkpoint.unit_id.clone(), checkpoint.clone());
        }
        Ok(())
    }

    fn delete(&self, unit_id: &str) -> Result<bool> {
        self.check()?;
        Ok(self.checkpoints.write().remove(unit_id).is_some())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        self.check()?;
        Ok(self.checkpoints.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EnrichmentResult;
    use crate::fingerprint::FingerprintBuilder;
    use serde_json::json;

    #[test]
    fn test_put_get() {
        let store = MemoryStore::new();
        let fp = FingerprintBuilder::build("u", "d", "v", "").unwrap();
        let entry = CacheEntry::from_result(fp, EnrichmentResult::new(json!(1)), 0);

        store.put(&fp, &entry).unwrap();
        assert_eq!(store.get(&fp).unwrap(), Some(entry));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_unavailable_store_fails() {
        let store = MemoryStore::new();
        let fp = FingerprintBuilder::build("u", "d", "v", "").unwrap();
        store.set_available(false);

        let err = store.get(&fp).unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_retryable());

        store.set_available(true);
        assert!(store.get(&fp).unwrap().is_none());
        assert_eq!(store.operation_count(), 2);
    }

    #[test]
    fn test_checkpoint_keeps_highest_offset() {
        let store = MemoryStore::new();
        store.save(&Checkpoint::new("u", 8, json!(8))).unwrap();
        store.save(&Checkpoint::new("u", 3, json!(3))).unwrap();
        assert_eq!(store.load("u").unwrap().unwrap().last_processed_offset, 8);
    }
}
