//! The audit ledger service.
//!
//! Every state transition in the vault goes through [`AuditLedger::append`]
//! or [`AuditLedger::append_all`]. Appends are serialized by a single async
//! mutex over the chain tail, which gives all events one total order. The
//! ledger also owns the [`VaultIndex`]: an event is applied to the index
//! only after the store has accepted it, and before the tail lock is
//! released, so the index never runs ahead of or out of order with the
//! chain.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use sealvault_access::{EventDetail, VaultIndex};
use sealvault_core::{find_chain_break, AuditEvent, ChainHash, EventDraft, LedgerKeypair, LedgerPublicKey};
use sealvault_store::{AppendResult, ChainTail, LedgerError, LedgerResult, LedgerStore};

use crate::config::LedgerConfig;
use crate::retry::{retry, RetryPolicy};

/// Events read per store call while replaying.
const REPLAY_PAGE: u64 = 512;

pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    keypair: LedgerKeypair,
    policy: RetryPolicy,
    verify_on_open: bool,
    tail: Mutex<ChainTail>,
    /// Set when an append gave up; the store may hold more than we know.
    stale: AtomicBool,
    index: RwLock<VaultIndex>,
}

impl AuditLedger {
    /// Open the ledger and rebuild the index from genesis.
    ///
    /// With `verify_on_open`, a chain whose hashes, links or signatures do
    /// not check out is refused as corrupt.
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        keypair: LedgerKeypair,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        let ledger = Self {
            store,
            keypair,
            policy: RetryPolicy::from(&config),
            verify_on_open: config.verify_on_open,
            tail: Mutex::new(ChainTail::EMPTY),
            stale: AtomicBool::new(false),
            index: RwLock::new(VaultIndex::new()),
        };

        let (index, tail) = ledger.rebuild(ledger.verify_on_open).await?;
        *ledger.tail.lock().await = tail;
        *ledger.index.write().unwrap_or_else(PoisonError::into_inner) = index;

        tracing::info!(
            events = tail.len,
            ledger_key = %ledger.public_key().to_hex(),
            "opened audit ledger"
        );
        Ok(ledger)
    }

    /// The key events are signed with.
    pub fn public_key(&self) -> LedgerPublicKey {
        self.keypair.public_key()
    }

    /// Run `f` against the current index.
    pub fn with_index<R>(&self, f: impl FnOnce(&VaultIndex) -> R) -> R {
        f(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one event and return it as placed on the chain.
    pub async fn append(&self, draft: EventDraft) -> LedgerResult<AuditEvent> {
        let mut events = self.append_all(vec![draft]).await?;
        events
            .pop()
            .ok_or_else(|| LedgerError::InvalidBatch("empty append".into()))
    }

    /// Append several events atomically: all of them land, or none do.
    pub async fn append_all(&self, drafts: Vec<EventDraft>) -> LedgerResult<Vec<AuditEvent>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        for draft in &drafts {
            EventDetail::decode(draft.kind, &draft.detail)
                .map_err(|e| LedgerError::InvalidBatch(e.to_string()))?;
        }

        let mut tail = self.tail.lock().await;
        if self.stale.load(Ordering::Acquire) {
            self.catch_up(&mut tail).await?;
        }

        let mut prior = tail.last_hash;
        let events: Vec<AuditEvent> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let event = AuditEvent::seal(draft, tail.len + i as u64, prior, &self.keypair);
                prior = event.this_hash;
                event
            })
            .collect();

        let outcome = self
            .with_retry("append", || self.store.append_batch(&events))
            .await;
        match outcome {
            Ok(result) => {
                if result == AppendResult::AlreadyPresent {
                    tracing::debug!(seq = tail.len, "batch was already present");
                }
            }
            Err(e) => {
                self.stale.store(true, Ordering::Release);
                return Err(e);
            }
        }

        self.apply(&events);
        tail.len += events.len() as u64;
        tail.last_hash = prior;

        for event in &events {
            tracing::debug!(seq = event.seq, kind = event.kind.name(), "appended audit event");
        }
        Ok(events)
    }

    /// Apply freshly stored events to the index.
    fn apply(&self, events: &[AuditEvent]) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            if let Err(e) = index.apply_event(event) {
                tracing::error!(seq = event.seq, error = %e, "index rejected stored event");
            }
        }
    }

    /// Pick up events a timed-out append may still have written.
    async fn catch_up(&self, tail: &mut ChainTail) -> LedgerResult<()> {
        let stored = self.with_retry("tail", || self.store.tail()).await?;
        if stored.len > tail.len {
            let missing = self
                .with_retry("range", || self.store.range(tail.len, stored.len))
                .await?;
            tracing::warn!(
                from = tail.len,
                to = stored.len,
                "recovered events written by an abandoned append"
            );
            self.apply(&missing);
        }
        *tail = stored;
        self.stale.store(false, Ordering::Release);
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, what: &'static str, call: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        retry(&self.policy, what, call).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of events on the chain.
    pub async fn len(&self) -> u64 {
        self.tail.lock().await.len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Events with `from <= seq < to`; `to` is clamped to the chain length.
    pub async fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        let to = to.min(self.len().await);
        if from >= to {
            return Ok(Vec::new());
        }
        self.with_retry("range", || self.store.range(from, to)).await
    }

    /// Recompute hashes and signatures over `[from, to)` and check every
    /// link, including the link from event `from - 1` into the range.
    ///
    /// An empty range is valid. Rows the store cannot decode count as a
    /// broken chain.
    pub async fn verify_chain(&self, from: u64, to: u64) -> LedgerResult<bool> {
        let to = to.min(self.len().await);
        if from >= to {
            return Ok(true);
        }

        let result = self.verify_range(from, to).await;
        match result {
            Err(LedgerError::Corrupt(reason)) => {
                tracing::warn!(from, to, %reason, "chain verification hit a corrupt event");
                Ok(false)
            }
            other => other,
        }
    }

    async fn verify_range(&self, from: u64, to: u64) -> LedgerResult<bool> {
        let prior = if from == 0 {
            ChainHash::ZERO
        } else {
            match self.with_retry("event", || self.store.event(from - 1)).await? {
                Some(event) => event.this_hash,
                None => return Ok(false),
            }
        };

        let events = self.with_retry("range", || self.store.range(from, to)).await?;
        if events.len() as u64 != to - from {
            tracing::warn!(from, to, found = events.len(), "chain has missing events");
            return Ok(false);
        }

        match find_chain_break(&prior, from, &events, &self.public_key()) {
            None => Ok(true),
            Some(seq) => {
                tracing::warn!(seq, "audit chain broken");
                Ok(false)
            }
        }
    }

    /// Rebuild an index from genesis without touching the live one.
    pub async fn replay(&self) -> LedgerResult<VaultIndex> {
        let (index, _) = self.rebuild(false).await?;
        Ok(index)
    }

    async fn rebuild(&self, verify: bool) -> LedgerResult<(VaultIndex, ChainTail)> {
        let stored = self.with_retry("tail", || self.store.tail()).await?;
        let ledger_key = self.public_key();
        let mut index = VaultIndex::new();
        let mut prior = ChainHash::ZERO;
        let mut from = 0;

        while from < stored.len {
            let to = (from + REPLAY_PAGE).min(stored.len);
            let page = self.with_retry("range", || self.store.range(from, to)).await?;
            if page.len() as u64 != to - from {
                return Err(LedgerError::Corrupt(format!(
                    "expected {} events in [{from}, {to}), found {}",
                    to - from,
                    page.len()
                )));
            }
            if verify {
                if let Some(seq) = find_chain_break(&prior, from, &page, &ledger_key) {
                    return Err(LedgerError::Corrupt(format!("chain broken at seq {seq}")));
                }
            }
            for event in &page {
                index
                    .apply_event(event)
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
            }
            prior = page.last().map_or(prior, |e| e.this_hash);
            from = to;
        }

        Ok((index, stored))
    }
}
