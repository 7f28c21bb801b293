//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for SealVault. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking. One database
//! holds both the blob table and the audit chain.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use sealvault_core::{
    hash_content, now_millis, AuditEvent, AuditKind, ChainHash, ContentHash, EventSignature,
    PrincipalId, Subject,
};

use crate::error::{LedgerError, LedgerResult, Result, StoreError};
use crate::migration;
use crate::traits::{
    check_batch_shape, classify_append, AppendResult, ChainTail, ContentStore, LedgerStore,
    PutResult,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_COLUMNS: &str = "seq, kind, actor, subject_type, subject_id, timestamp, detail,
     prior_hash, this_hash, signature";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Raw column values of one `audit_events` row.
struct EventRow {
    seq: i64,
    kind: i64,
    actor: String,
    subject_type: i64,
    subject_id: Vec<u8>,
    timestamp: i64,
    detail: Vec<u8>,
    prior_hash: Vec<u8>,
    this_hash: Vec<u8>,
    signature: Vec<u8>,
}

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        seq: row.get(0)?,
        kind: row.get(1)?,
        actor: row.get(2)?,
        subject_type: row.get(3)?,
        subject_id: row.get(4)?,
        timestamp: row.get(5)?,
        detail: row.get(6)?,
        prior_hash: row.get(7)?,
        this_hash: row.get(8)?,
        signature: row.get(9)?,
    })
}

fn fixed<const N: usize>(bytes: Vec<u8>, column: &str, seq: i64) -> LedgerResult<[u8; N]> {
    bytes.try_into().map_err(|b: Vec<u8>| {
        LedgerError::Corrupt(format!(
            "event {seq}: {column} has {} bytes, expected {N}",
            b.len()
        ))
    })
}

impl TryFrom<EventRow> for AuditEvent {
    type Error = LedgerError;

    fn try_from(row: EventRow) -> LedgerResult<Self> {
        let seq = row.seq;
        let corrupt = |what: String| LedgerError::Corrupt(format!("event {seq}: {what}"));

        let kind = u16::try_from(row.kind)
            .map_err(|_| corrupt(format!("kind {} out of range", row.kind)))
            .and_then(|k| AuditKind::from_u16(k).map_err(|e| corrupt(e.to_string())))?;
        let subject_type = u8::try_from(row.subject_type)
            .map_err(|_| corrupt(format!("subject type {} out of range", row.subject_type)))?;
        let subject = Subject::from_parts(subject_type, fixed(row.subject_id, "subject_id", seq)?)
            .map_err(|e| corrupt(e.to_string()))?;
        let actor = PrincipalId::new(row.actor).map_err(|e| corrupt(e.to_string()))?;

        Ok(AuditEvent {
            seq: seq as u64,
            kind,
            actor,
            subject,
            timestamp: row.timestamp,
            detail: row.detail,
            prior_hash: ChainHash(fixed(row.prior_hash, "prior_hash", seq)?),
            this_hash: ChainHash(fixed(row.this_hash, "this_hash", seq)?),
            signature: EventSignature(fixed(row.signature, "signature", seq)?),
        })
    }
}

fn query_range(conn: &Connection, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM audit_events
         WHERE seq >= ?1 AND seq < ?2
         ORDER BY seq"
    ))?;
    let rows = stmt
        .query_map(params![from as i64, to as i64], read_event_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(AuditEvent::try_from).collect()
}

fn query_tail(conn: &Connection) -> LedgerResult<ChainTail> {
    let last: Option<(i64, Vec<u8>)> = conn
        .query_row(
            "SELECT seq, this_hash FROM audit_events ORDER BY seq DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match last {
        None => Ok(ChainTail::EMPTY),
        Some((seq, hash)) => Ok(ChainTail {
            len: seq as u64 + 1,
            last_hash: ChainHash(fixed(hash, "this_hash", seq)?),
        }),
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn put(&self, hash: &ContentHash, blob: Bytes) -> Result<PutResult> {
        let actual = hash_content(&blob);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: *hash,
                actual,
            });
        }

        let hash = *hash;
        self.blocking(move |conn| -> Result<PutResult> {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO blobs (content_hash, data, size, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    hash.0.as_slice(),
                    blob.as_ref(),
                    blob.len() as i64,
                    now_millis()
                ],
            )?;
            if changed == 1 {
                tracing::debug!(hash = ?hash, size = blob.len(), "stored blob");
                Ok(PutResult::Inserted)
            } else {
                tracing::debug!(hash = ?hash, "blob already stored");
                Ok(PutResult::AlreadyExists)
            }
        })
        .await
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let hash = *hash;
        self.blocking(move |conn| -> Result<Option<Bytes>> {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM blobs WHERE content_hash = ?1",
                    params![hash.0.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn has(&self, hash: &ContentHash) -> Result<bool> {
        let hash = *hash;
        self.blocking(move |conn| -> Result<bool> {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blobs WHERE content_hash = ?1",
                    params![hash.0.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.blocking(|conn| -> Result<u64> {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append_batch(&self, events: &[AuditEvent]) -> LedgerResult<AppendResult> {
        check_batch_shape(events)?;
        let events = events.to_vec();

        self.blocking(move |conn| -> LedgerResult<AppendResult> {
            let tx = conn.transaction()?;

            let tail = query_tail(&tx)?;
            let existing = match events.first() {
                Some(first) if first.seq < tail.len => {
                    query_range(&tx, first.seq, first.seq + events.len() as u64)?
                }
                _ => Vec::new(),
            };
            if let Some(result) = classify_append(&tail, &events, &existing)? {
                return Ok(result);
            }

            let now = now_millis();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO audit_events (
                        seq, kind, actor, subject_type, subject_id, timestamp, detail,
                        prior_hash, this_hash, signature, appended_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for event in &events {
                    stmt.execute(params![
                        event.seq as i64,
                        event.kind.to_u16() as i64,
                        event.actor.as_str(),
                        event.subject.type_code() as i64,
                        event.subject.id_bytes().as_slice(),
                        event.timestamp,
                        event.detail.as_slice(),
                        event.prior_hash.0.as_slice(),
                        event.this_hash.0.as_slice(),
                        event.signature.0.as_slice(),
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn tail(&self) -> LedgerResult<ChainTail> {
        self.blocking(|conn| query_tail(conn)).await
    }

    async fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        if from >= to {
            return Ok(Vec::new());
        }
        self.blocking(move |conn| query_range(conn, from, to)).await
    }

    async fn event(&self, seq: u64) -> LedgerResult<Option<AuditEvent>> {
        let mut events = self
            .blocking(move |conn| query_range(conn, seq, seq + 1))
            .await?;
        Ok(events.pop())
    }
}
