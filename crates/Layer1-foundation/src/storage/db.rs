//! SQLite durable store
//!
//! Backs tier 2 of the result cache and the checkpoint table:
//! - `result_entries`: one row per fingerprint, payload as JSON text
//! - `checkpoints`: one row per unit
//!
//! ## Migration System
//!
//! Schema is versioned and migrations run on open.
//! - Version 1: `result_entries`
//! - Version 2: `checkpoints`

use crate::core::{CacheEntry, Checkpoint, CheckpointStore, DurableStore};
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// SQLite-backed store for result entries and checkpoints
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create data directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to open database: {}", e)))?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::StoreUnavailable(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    /// In-memory database (tests)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::StoreUnavailable(format!("Failed to create in-memory database: {}", e))
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS result_entries (
                fingerprint TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                cost_units INTEGER NOT NULL DEFAULT 0,
                compute_duration_ms INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_result_entries_created
                ON result_entries(created_at);

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::StoreUnavailable(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Version 2: checkpoint table
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                unit_id TEXT PRIMARY KEY,
                last_processed_offset INTEGER NOT NULL,
                partial_aggregate TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to create checkpoints: {}", e)))
    }

    /// Number of stored checkpoints
    pub fn checkpoint_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("bad timestamp {}: {}", raw, e)))
}

struct RawEntry {
    fingerprint: String,
    payload: String,
    size_bytes: i64,
    created_at: String,
    last_accessed_at: String,
    access_count: i64,
    cost_units: i64,
    compute_duration_ms: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fingerprint: row.get(0)?,
            payload: row.get(1)?,
            size_bytes: row.get(2)?,
            created_at: row.get(3)?,
            last_accessed_at: row.get(4)?,
            access_count: row.get(5)?,
            cost_units: row.get(6)?,
            compute_duration_ms: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry> {
        Ok(CacheEntry {
            fingerprint: Fingerprint::from_hex(&self.fingerprint)?,
            payload: Arc::new(serde_json::from_str(&self.payload)?),
            size_bytes: self.size_bytes as u64,
            created_at: parse_time(&self.created_at)?,
            last_accessed_at: parse_time(&self.last_accessed_at)?,
            access_count: self.access_count as u64,
            cost_units: self.cost_units as u64,
            compute_duration_ms: self.compute_duration_ms as u64,
        })
    }
}

struct RawCheckpoint {
    unit_id: String,
    offset: i64,
    aggregate: String,
    updated_at: String,
}

impl RawCheckpoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            unit_id: row.get(0)?,
            offset: row.get(1)?,
            aggregate: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            unit_id: self.unit_id,
            last_processed_offset: self.offset as u64,
            partial_aggregate: serde_json::from_str(&self.aggregate)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

// ============================================================================
// DurableStore
// ============================================================================

impl DurableStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                r#"
                SELECT fingerprint, payload, size_bytes, created_at, last_accessed_at,
                       access_count, cost_units, compute_duration_ms
                FROM result_entries WHERE fingerprint = ?1
                "#,
                params![fingerprint.to_hex()],
                RawEntry::from_row,
            )
            .optional()?;

        raw.map(RawEntry::into_entry).transpose()
    }

    fn put(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        let payload = serde_json::to_string(entry.payload())?;
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO result_entries
                (fingerprint, payload, size_bytes, created_at, last_accessed_at,
                 access_count, cost_units, compute_duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                fingerprint.to_hex(),
                payload,
                entry.size_bytes as i64,
                entry.created_at.to_rfc3339(),
                entry.last_accessed_at.to_rfc3339(),
                entry.access_count as i64,
                entry.cost_units as i64,
                entry.compute_duration_ms as i64,
            ],
        )?;

        Ok(())
    }

    fn delete(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM result_entries WHERE fingerprint = ?1",
            params![fingerprint.to_hex()],
        )?;
        Ok(removed > 0)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM result_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM result_entries", [])?;
        info!("Cleared {} durable result entries", removed);
        Ok(removed)
    }
}

// ============================================================================
// CheckpointStore
// ============================================================================

impl CheckpointStore for SqliteStore {
    fn load(&self, unit_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                r#"
                SELECT unit_id, last_processed_offset, partial_aggregate, updated_at
                FROM checkpoints WHERE unit_id = ?1
                "#,
                params![unit_id],
                RawCheckpoint::from_row,
            )
            .optional()?;

        raw.map(RawCheckpoint::into_checkpoint).transpose()
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let aggregate = serde_json::to_string(&checkpoint.partial_aggregate)?;
        let conn = self.lock()?;

        // Offsets never move backwards
        conn.execute(
            r#"
            INSERT INTO checkpoints (unit_id, last_processed_offset, partial_aggregate, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(unit_id) DO UPDATE SET
                last_processed_offset = excluded.last_processed_offset,
                partial_aggregate = excluded.partial_aggregate,
                updated_at = excluded.updated_at
            WHERE excluded.last_processed_offset >= checkpoints.last_processed_offset
            "#,
            params![
                checkpoint.unit_id,
                checkpoint.last_processed_offset as i64,
                aggregate,
                checkpoint.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn delete(&self, unit_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM checkpoints WHERE unit_id = ?1",
            params![unit_id],
        )?;
        Ok(removed > 0)
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT unit_id, last_processed_offset, partial_aggregate, updated_at
            FROM checkpoints ORDER BY updated_at DESC
            "#,
        )?;

        let raws = stmt
            .query_map([], RawCheckpoint::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raws.into_iter().map(RawCheckpoint::into_checkpoint).collect()
    }
}
