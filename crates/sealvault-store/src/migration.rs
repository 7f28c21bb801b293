//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1.

use rusqlite::Connection;
use sealvault_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Encrypted blobs, addressed by the Blake3 hash of their bytes
        CREATE TABLE blobs (
            content_hash BLOB PRIMARY KEY,    -- 32 bytes
            data BLOB NOT NULL,               -- nonce || ciphertext
            size INTEGER NOT NULL,
            stored_at INTEGER NOT NULL        -- local timestamp (Unix ms)
        );

        -- The audit chain. Rows are only ever inserted.
        CREATE TABLE audit_events (
            seq INTEGER PRIMARY KEY,          -- 0-based, gapless
            kind INTEGER NOT NULL,            -- AuditKind as u16
            actor TEXT NOT NULL,
            subject_type INTEGER NOT NULL,    -- 0=file, 1=request, 2=capability
            subject_id BLOB NOT NULL,         -- 32 bytes
            timestamp INTEGER NOT NULL,       -- Unix ms
            detail BLOB NOT NULL,             -- CBOR domain record
            prior_hash BLOB NOT NULL,         -- 32 bytes
            this_hash BLOB NOT NULL UNIQUE,   -- 32 bytes
            signature BLOB NOT NULL,          -- 64 bytes, Ed25519
            appended_at INTEGER NOT NULL
        );

        CREATE INDEX idx_audit_subject ON audit_events(subject_type, subject_id);
        CREATE INDEX idx_audit_kind ON audit_events(kind);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"blobs".to_string()));
        assert!(tables.contains(&"audit_events".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
