//! In-memory implementations of the store traits.
//!
//! These are primarily for testing. They have the same semantics as SQLite
//! but keep everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use sealvault_core::{hash_content, AuditEvent, ChainHash, ContentHash};

use crate::error::{LedgerError, LedgerResult, Result, StoreError};
use crate::traits::{
    check_batch_shape, classify_append, AppendResult, ChainTail, ContentStore, LedgerStore,
    PutResult,
};

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

/// In-memory blob store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentHash, Bytes>>,
}

impl MemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, hash: &ContentHash, blob: Bytes) -> Result<PutResult> {
        let actual = hash_content(&blob);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: *hash,
                actual,
            });
        }

        let mut blobs = self.blobs.write().map_err(poisoned)?;
        if blobs.contains_key(hash) {
            return Ok(PutResult::AlreadyExists);
        }
        blobs.insert(*hash, blob);
        Ok(PutResult::Inserted)
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.get(hash).cloned())
    }

    async fn has(&self, hash: &ContentHash) -> Result<bool> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.contains_key(hash))
    }

    async fn count(&self) -> Result<u64> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.len() as u64)
    }
}

/// In-memory audit chain. All data is lost when the store is dropped.
#[derive(Default)]
pub struct MemoryLedgerStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryLedgerStore {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append_batch(&self, batch: &[AuditEvent]) -> LedgerResult<AppendResult> {
        check_batch_shape(batch)?;

        let mut events = self
            .events
            .write()
            .map_err(|_| LedgerError::Unavailable("lock poisoned".into()))?;

        let tail = ChainTail {
            len: events.len() as u64,
            last_hash: events.last().map_or(ChainHash::ZERO, |e| e.this_hash),
        };
        let existing: &[AuditEvent] = match batch.first() {
            Some(first) if first.seq < tail.len => {
                let start = first.seq as usize;
                let end = (start + batch.len()).min(events.len());
                &events[start..end]
            }
            _ => &[],
        };

        if let Some(result) = classify_append(&tail, batch, existing)? {
            return Ok(result);
        }
        events.extend_from_slice(batch);
        Ok(AppendResult::Appended)
    }

    async fn tail(&self) -> LedgerResult<ChainTail> {
        let events = self
            .events
            .read()
            .map_err(|_| LedgerError::Unavailable("lock poisoned".into()))?;
        Ok(ChainTail {
            len: events.len() as u64,
            last_hash: events.last().map_or(ChainHash::ZERO, |e| e.this_hash),
        })
    }

    async fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        let events = self
            .events
            .read()
            .map_err(|_| LedgerError::Unavailable("lock poisoned".into()))?;
        let len = events.len() as u64;
        let to = to.min(len);
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(events[from as usize..to as usize].to_vec())
    }

    async fn event(&self, seq: u64) -> LedgerResult<Option<AuditEvent>> {
        let events = self
            .events
            .read()
            .map_err(|_| LedgerError::Unavailable("lock poisoned".into()))?;
        Ok(events.get(seq as usize).cloned())
    }
}
