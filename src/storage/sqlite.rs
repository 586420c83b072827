//! SQLite-backed local cache store.
//!
//! The durable layout is exactly one record per tenant: the full course
//! array plus `last_updated` and `total_classes`. Course embeddings are
//! split out into f16 blobs to keep the JSON payload small; both tables are
//! written in a single transaction so a reader racing a writer observes
//! either the old snapshot or the new one in full, never a mix.
//!
//! Read paths never propagate storage failures. A missing, locked, or
//! corrupted database reads as "no cache", which the refresh coordinator
//! resolves by refetching from the backend.

use std::path::Path;

use chrono::{DateTime, Utc};
use half::f16;
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::catalog::{CacheSnapshot, CourseRecord};
use crate::error::{EngineError, Result};
use crate::storage::migrations;

/// Durable per-tenant snapshot store.
pub struct CacheStore {
    conn: Mutex<Connection>,
    ephemeral: bool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open the store at the given path, creating it if necessary.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            ephemeral: false,
        })
    }

    /// Open an in-memory store. Snapshots do not survive the process.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            ephemeral: true,
        })
    }

    /// Open the store at `path`, degrading to an in-memory store if the
    /// durable one is unavailable or corrupted.
    ///
    /// An ephemeral store behaves like a perpetually cold cache: the
    /// engine refetches instead of failing.
    pub fn open_or_ephemeral(path: impl AsRef<Path>) -> Result<Self> {
        match Self::open(&path) {
            Ok(store) => Ok(store),
            Err(err) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %err,
                    "cache store unavailable, falling back to in-memory"
                );
                Self::open_in_memory()
            }
        }
    }

    /// Whether this store lost its durable backing and lives in memory only.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// O(1) existence check; does not deserialize the catalog.
    #[must_use]
    pub fn has_cached_data(&self, tenant: &str) -> bool {
        let conn = self.conn.lock();
        let result: rusqlite::Result<bool> = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM catalog_snapshots WHERE tenant = ?)",
            [tenant],
            |row| row.get(0),
        );
        match result {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(tenant, error = %err, "has_cached_data query failed, treating as cache miss");
                false
            }
        }
    }

    /// Cheap staleness check independent of reading the full snapshot.
    #[must_use]
    pub fn read_last_updated(&self, tenant: &str) -> Option<DateTime<Utc>> {
        let conn = self.conn.lock();
        let raw: rusqlite::Result<String> = conn.query_row(
            "SELECT last_updated FROM catalog_snapshots WHERE tenant = ?",
            [tenant],
            |row| row.get(0),
        );
        match raw {
            Ok(text) => parse_timestamp(tenant, &text),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(err) => {
                tracing::warn!(tenant, error = %err, "last_updated query failed, treating as cache miss");
                None
            }
        }
    }

    /// Read the full snapshot for a tenant, or `None` on miss or any
    /// storage/decode failure.
    #[must_use]
    pub fn read_snapshot(&self, tenant: &str) -> Option<CacheSnapshot> {
        match self.try_read_snapshot(tenant) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(tenant, error = %err, "snapshot read failed, treating as cache miss");
                None
            }
        }
    }

    fn try_read_snapshot(&self, tenant: &str) -> Result<Option<CacheSnapshot>> {
        let conn = self.conn.lock();

        let row: rusqlite::Result<(String, i64, String)> = conn.query_row(
            "SELECT courses_json, total_classes, last_updated
             FROM catalog_snapshots WHERE tenant = ?",
            [tenant],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        );
        let (courses_json, total_classes, last_updated) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut records: Vec<CourseRecord> = serde_json::from_str(&courses_json)?;

        let mut stmt = conn.prepare(
            "SELECT class_code, embedding, dims FROM course_embeddings WHERE tenant = ?",
        )?;
        let mut embeddings = std::collections::HashMap::new();
        let rows = stmt.query_map([tenant], |row| {
            let class_code: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let dims: i64 = row.get(2)?;
            Ok((class_code, blob, dims))
        })?;
        for row in rows {
            let (class_code, blob, dims) = row?;
            let dims = usize::try_from(dims).unwrap_or(0);
            embeddings.insert(class_code, decode_embedding_f16(&blob, dims)?);
        }

        for record in &mut records {
            record.embedding = embeddings.remove(&record.class_code);
        }

        let last_updated = DateTime::parse_from_rfc3339(&last_updated)
            .map_err(|err| EngineError::Config(format!("bad last_updated timestamp: {err}")))?
            .with_timezone(&Utc);

        let mut snapshot = CacheSnapshot::new(tenant, records, last_updated);
        snapshot.total_classes = usize::try_from(total_classes).unwrap_or(snapshot.records.len());
        Ok(Some(snapshot))
    }

    /// Atomically replace a tenant's snapshot.
    ///
    /// The previous snapshot, its embeddings, and the metadata row are
    /// replaced in one transaction; a failure leaves the old snapshot fully
    /// intact.
    pub fn write_snapshot(
        &self,
        tenant: &str,
        records: &[CourseRecord],
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        // Embeddings are persisted as f16 blobs, so the JSON column carries
        // every field except the vector.
        let stripped: Vec<CourseRecord> = records
            .iter()
            .map(|r| {
                let mut r = r.clone();
                r.embedding = None;
                r
            })
            .collect();
        let courses_json = serde_json::to_string(&stripped)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO catalog_snapshots (tenant, courses_json, total_classes, last_updated)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(tenant) DO UPDATE SET
                courses_json=excluded.courses_json,
                total_classes=excluded.total_classes,
                last_updated=excluded.last_updated",
            params![
                tenant,
                courses_json,
                records.len() as i64,
                fetched_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM course_embeddings WHERE tenant = ?", [tenant])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO course_embeddings (tenant, class_code, embedding, dims)
                 VALUES (?, ?, ?, ?)",
            )?;
            for record in records {
                if let Some(embedding) = &record.embedding {
                    stmt.execute(params![
                        tenant,
                        record.class_code,
                        encode_embedding_f16(embedding),
                        embedding.len() as i64,
                    ])?;
                }
            }
        }

        tx.commit()?;
        tracing::debug!(tenant, count = records.len(), "snapshot committed");
        Ok(())
    }

    /// Remove a tenant's snapshot entirely (explicit cache-clear).
    pub fn clear_tenant(&self, tenant: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM catalog_snapshots WHERE tenant = ?", [tenant])?;
        tx.execute("DELETE FROM course_embeddings WHERE tenant = ?", [tenant])?;
        tx.commit()?;
        Ok(())
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(())
    }
}

fn parse_timestamp(tenant: &str, text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(err) => {
            tracing::warn!(tenant, error = %err, "unparseable last_updated, treating as cache miss");
            None
        }
    }
}

fn encode_embedding_f16(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for value in values {
        let bits = f16::from_f32(*value).to_bits();
        out.extend_from_slice(&bits.to_le_bytes());
    }
    out
}

fn decode_embedding_f16(bytes: &[u8], dims: usize) -> Result<Vec<f32>> {
    let expected = dims.saturating_mul(2);
    if bytes.len() != expected {
        return Err(EngineError::Config(format!(
            "embedding blob length mismatch: expected {expected}, got {}",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(dims);
    for chunk in bytes.chunks_exact(2) {
        let bits = u16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(f16::from_bits(bits).to_f32());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn course(code: &str, embedding: Option<Vec<f32>>) -> CourseRecord {
        CourseRecord {
            class_code: code.to_string(),
            course_name: format!("Course {code}"),
            course_desc: String::new(),
            credits: None,
            requisites: None,
            embedding,
            attributes: std::collections::BTreeMap::new(),
            grade_count: 10,
            gpa: Some(3.2),
            indexed_difficulty: None,
            indexed_fun: None,
            indexed_workload: None,
            review_count: 0,
            overall_rating: None,
        }
    }

    #[test]
    fn test_has_cached_data_false_then_true() {
        let store = CacheStore::open_in_memory().unwrap();
        assert!(!store.has_cached_data("uw"));

        store
            .write_snapshot("uw", &[course("CS 101", None)], Utc::now())
            .unwrap();
        assert!(store.has_cached_data("uw"));
        assert!(!store.has_cached_data("other"));
    }

    #[test]
    fn test_snapshot_roundtrip_with_embeddings() {
        let store = CacheStore::open_in_memory().unwrap();
        let records = vec![
            course("CS 101", Some(vec![0.5, -0.25, 1.0])),
            course("MATH 222", None),
        ];
        let fetched_at = Utc::now();
        store.write_snapshot("uw", &records, fetched_at).unwrap();

        let snapshot = store.read_snapshot("uw").unwrap();
        assert_eq!(snapshot.total_classes, 2);
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[1].embedding, None);

        // f16 roundtrip is lossy but these values are exactly representable.
        assert_eq!(
            snapshot.records[0].embedding,
            Some(vec![0.5, -0.25, 1.0])
        );
    }

    #[test]
    fn test_write_replaces_whole_snapshot() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .write_snapshot(
                "uw",
                &[course("CS 101", Some(vec![1.0])), course("CS 102", None)],
                Utc::now(),
            )
            .unwrap();
        store
            .write_snapshot("uw", &[course("MATH 222", None)], Utc::now())
            .unwrap();

        let snapshot = store.read_snapshot("uw").unwrap();
        assert_eq!(snapshot.total_classes, 1);
        assert_eq!(snapshot.records[0].class_code, "MATH 222");

        // Old embeddings must not leak into the new snapshot.
        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM course_embeddings WHERE tenant = 'uw'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_read_last_updated() {
        let store = CacheStore::open_in_memory().unwrap();
        assert!(store.read_last_updated("uw").is_none());

        let fetched_at = Utc::now();
        store.write_snapshot("uw", &[], fetched_at).unwrap();

        let read = store.read_last_updated("uw").unwrap();
        assert!((read - fetched_at).num_seconds().abs() < 1);
    }

    #[test]
    fn test_clear_tenant() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .write_snapshot("uw", &[course("CS 101", Some(vec![1.0]))], Utc::now())
            .unwrap();
        store.clear_tenant("uw").unwrap();
        assert!(!store.has_cached_data("uw"));
        assert!(store.read_snapshot("uw").is_none());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .write_snapshot("uw", &[course("CS 101", None)], Utc::now())
            .unwrap();
        store
            .write_snapshot("purdue", &[course("ECE 101", None), course("ECE 102", None)], Utc::now())
            .unwrap();

        assert_eq!(store.read_snapshot("uw").unwrap().total_classes, 1);
        assert_eq!(store.read_snapshot("purdue").unwrap().total_classes, 2);

        store.clear_tenant("uw").unwrap();
        assert!(store.read_snapshot("purdue").is_some());
    }

    #[test]
    fn test_corrupt_json_degrades_to_cache_miss() {
        let store = CacheStore::open_in_memory().unwrap();
        store.write_snapshot("uw", &[], Utc::now()).unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE catalog_snapshots SET courses_json = 'garbage' WHERE tenant = 'uw'",
                [],
            )
            .unwrap();
        }
        assert!(store.read_snapshot("uw").is_none());
    }

    #[test]
    fn test_open_or_ephemeral_falls_back() {
        let dir = tempdir().unwrap();
        // A directory is not a valid database path.
        let store = CacheStore::open_or_ephemeral(dir.path()).unwrap();
        assert!(store.is_ephemeral());
        assert!(!store.has_cached_data("uw"));
    }

    #[test]
    fn test_durable_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = CacheStore::open(&path).unwrap();
            store
                .write_snapshot("uw", &[course("CS 101", None)], Utc::now())
                .unwrap();
        }
        let store = CacheStore::open(&path).unwrap();
        assert!(store.has_cached_data("uw"));
    }

    #[test]
    fn test_f16_codec_length_check() {
        let encoded = encode_embedding_f16(&[1.0, 2.0]);
        assert_eq!(encoded.len(), 4);
        assert!(decode_embedding_f16(&encoded, 3).is_err());
        assert_eq!(decode_embedding_f16(&encoded, 2).unwrap(), vec![1.0, 2.0]);
    }
}
