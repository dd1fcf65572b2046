//! Durable store inspection

use anyhow::Context;
use enrich_foundation::{CheckpointStore, DurableStore, SqliteStore};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct StoreSummary {
    pub path: String,
    pub schema_version: i32,
    pub entries: usize,
    pub checkpoints: usize,
}

fn open(db: &Path) -> anyhow::Result<SqliteStore> {
    if !db.exists() {
        anyhow::bail!("store not found: {}", db.display());
    }
    SqliteStore::open(db).with_context(|| format!("failed to open {}", db.display()))
}

pub fn stats(db: &Path) -> anyhow::Result<StoreSummary> {
    let store = open(db)?;
    Ok(StoreSummary {
        path: db.display().to_string(),
        schema_version: store.schema_version()?,
        entries: DurableStore::len(&store)?,
        checkpoints: store.checkpoint_count()?,
    })
}

/// Remove every cached result; checkpoints are kept
pub fn purge(db: &Path) -> anyhow::Result<usize> {
    let store = open(db)?;
    Ok(DurableStore::clear(&store)?)
}

pub fn print_checkpoints(db: &Path) -> anyhow::Result<()> {
    let store = open(db)?;
    let checkpoints = CheckpointStore::list(&store)?;
    if checkpoints.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }

    println!("{:<32} {:>10}  {}", "UNIT", "OFFSET", "UPDATED");
    for checkpoint in checkpoints {
        println!(
            "{:<32} {:>10}  {}",
            checkpoint.unit_id,
            checkpoint.last_processed_offset,
            checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_foundation::{CacheEntry, Checkpoint, EnrichmentResult, FingerprintBuilder};
    use serde_json::json;

    #[test]
    fn test_stats_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("enrich.db");
        {
            let store = SqliteStore::open(&db).unwrap();
            let fp = FingerprintBuilder::build("u", "d", "v1", "").unwrap();
            let entry = CacheEntry::from_result(fp, EnrichmentResult::new(json!(1)), 3);
            store.put(&fp, &entry).unwrap();
            store.save(&Checkpoint::new("u", 4, json!([]))).unwrap();
        }

        let summary = stats(&db).unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.checkpoints, 1);

        assert_eq!(purge(&db).unwrap(), 1);
        let summary = stats(&db).unwrap();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.checkpoints, 1);
    }

    #[test]
    fn test_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        assert!(stats(&dir.path().join("absent.db")).is_err());
    }
}
