//! Core Traits - storage seams implemented by the durable tier

use super::types::{CacheEntry, Checkpoint};
use crate::fingerprint::Fingerprint;
use crate::Result;

/// Durable (tier 2) result store
///
/// Last write wins; no transactional guarantees beyond that.
pub trait DurableStore: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>>;

    fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()>;

    /// Returns whether an entry was removed
    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove everything, returning the number of removed entries
    fn clear(&self) -> Result<usize>;
}

/// Durable checkpoint store used by incremental processing
pub trait CheckpointStore: Send + Sync {
    fn load(&self, unit_id: &str) -> Result<Option<Checkpoint>>;

    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn delete(&self, unit_id: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<Checkpoint>>;
}
