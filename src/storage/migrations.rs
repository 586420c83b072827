//! Schema migrations for the catalog cache database.
//!
//! Versioned through `PRAGMA user_version`. Migrations only ever move
//! forward; a cache database is disposable, so a failed migration is
//! recovered by clearing the cache, never by downgrade logic.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS catalog_snapshots (
    tenant        TEXT PRIMARY KEY,
    courses_json  TEXT NOT NULL,
    total_classes INTEGER NOT NULL,
    last_updated  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS course_embeddings (
    tenant     TEXT NOT NULL,
    class_code TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    dims       INTEGER NOT NULL,
    PRIMARY KEY (tenant, class_code)
);
";

/// Run all pending migrations, returning the resulting schema version.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let version = run_migrations(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        for table in ["catalog_snapshots", "course_embeddings"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "table {table} should exist");
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let version = run_migrations(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
