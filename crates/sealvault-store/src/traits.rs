//! Store traits: the abstract interfaces for blob and ledger persistence.
//!
//! The vault is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (for tests).

use async_trait::async_trait;
use bytes::Bytes;
use sealvault_core::{AuditEvent, ChainHash, ContentHash};

use crate::error::{LedgerError, LedgerResult, Result};

/// Result of storing a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// Blob was stored.
    Inserted,
    /// A blob with this hash is already stored (idempotent - not an error).
    AlreadyExists,
}

/// Result of appending a batch to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    /// The batch was appended at the tail.
    Appended,
    /// The identical batch was already present (a retried write).
    AlreadyPresent,
}

/// Length and last hash of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTail {
    pub len: u64,
    /// `this_hash` of the last event, or zero when empty.
    pub last_hash: ChainHash,
}

impl ChainTail {
    pub const EMPTY: Self = Self {
        len: 0,
        last_hash: ChainHash::ZERO,
    };
}

/// Content-addressed blob storage.
///
/// There is no mutation API: a hash names exactly one blob for ever.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a blob under its content hash.
    ///
    /// Fails with `HashMismatch` if `blob` does not hash to `hash`. Storing
    /// the same hash twice, including concurrently, is a no-op success.
    async fn put(&self, hash: &ContentHash, blob: Bytes) -> Result<PutResult>;

    /// Fetch a blob.
    async fn get(&self, hash: &ContentHash) -> Result<Option<Bytes>>;

    /// Check if a blob exists.
    async fn has(&self, hash: &ContentHash) -> Result<bool>;

    /// Number of stored blobs.
    async fn count(&self) -> Result<u64>;
}

/// Append-only storage for the audit chain.
///
/// The store does not sign or hash; it only checks that a batch extends the
/// tail it currently holds.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Write
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a contiguous batch of events atomically: all or none.
    ///
    /// # Returns
    /// - `Appended` if the batch extended the tail.
    /// - `AlreadyPresent` if the exact same events are already stored at
    ///   those positions.
    /// - `Err(Conflict)` if the batch neither extends the tail nor is present.
    async fn append_batch(&self, events: &[AuditEvent]) -> LedgerResult<AppendResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Read
    // ─────────────────────────────────────────────────────────────────────────

    /// Current tail of the chain.
    async fn tail(&self) -> LedgerResult<ChainTail>;

    /// Events with `from <= seq < to`, ordered by seq.
    async fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>>;

    /// A single event by position.
    async fn event(&self, seq: u64) -> LedgerResult<Option<AuditEvent>>;
}

/// Check that a batch is a contiguous, internally linked run.
pub(crate) fn check_batch_shape(events: &[AuditEvent]) -> LedgerResult<()> {
    for pair in events.windows(2) {
        if pair[1].seq != pair[0].seq + 1 {
            return Err(LedgerError::InvalidBatch(format!(
                "seq {} follows seq {}",
                pair[1].seq, pair[0].seq
            )));
        }
        if pair[1].prior_hash != pair[0].this_hash {
            return Err(LedgerError::InvalidBatch(format!(
                "event {} does not link to its predecessor",
                pair[1].seq
            )));
        }
    }
    Ok(())
}

/// Decide what an append means against the current tail.
///
/// `existing` holds whatever is already stored at the batch's positions.
pub(crate) fn classify_append(
    tail: &ChainTail,
    events: &[AuditEvent],
    existing: &[AuditEvent],
) -> LedgerResult<Option<AppendResult>> {
    let Some(first) = events.first() else {
        return Ok(Some(AppendResult::AlreadyPresent));
    };

    if first.seq == tail.len {
        if first.prior_hash != tail.last_hash {
            return Err(LedgerError::Conflict {
                seq: first.seq,
                reason: "prior hash does not match the tail".into(),
            });
        }
        // Caller appends.
        return Ok(None);
    }

    let same = existing.len() == events.len()
        && existing
            .iter()
            .zip(events)
            .all(|(a, b)| a.seq == b.seq && a.this_hash == b.this_hash);
    if same {
        return Ok(Some(AppendResult::AlreadyPresent));
    }

    Err(LedgerError::Conflict {
        seq: first.seq,
        reason: format!("chain length is {}", tail.len),
    })
}
