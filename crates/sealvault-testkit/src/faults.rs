//! Failure-injecting store wrappers.
//!
//! Each wrapper forwards to an inner store and fails writes on demand with a
//! transient error. Reads always pass through, so a vault can still be
//! opened over a store that refuses every append. The content wrapper can
//! also slow down or corrupt the blobs it hands back.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use sealvault_core::{AuditEvent, ContentHash};
use sealvault_store::{
    AppendResult, ChainTail, ContentStore, LedgerError, LedgerResult, LedgerStore, PutResult,
    StoreError,
};

const ALWAYS: u32 = u32::MAX;

/// How many upcoming writes to fail.
#[derive(Debug, Default)]
struct Faults {
    remaining: AtomicU32,
    attempts: AtomicU32,
    delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
    corrupt_reads: AtomicBool,
}

impl Faults {
    fn with(remaining: u32) -> Self {
        Self {
            remaining: AtomicU32::new(remaining),
            ..Self::default()
        }
    }

    /// Count an attempt and decide whether it fails.
    fn trip(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok()
    }

    async fn pause(&self) {
        sleep_ms(self.delay_ms.load(Ordering::SeqCst)).await;
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn as_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

macro_rules! fault_controls {
    () => {
        /// Fail the next `n` writes, then recover.
        pub fn fail_next(&self, n: u32) {
            self.faults.remaining.store(n, Ordering::SeqCst);
        }

        /// Fail every write until [`heal`](Self::heal) is called.
        pub fn fail_always(&self) {
            self.faults.remaining.store(ALWAYS, Ordering::SeqCst);
        }

        pub fn heal(&self) {
            self.faults.remaining.store(0, Ordering::SeqCst);
        }

        /// Stall every write by `delay` before it reaches the inner store.
        pub fn stall(&self, delay: Duration) {
            self.faults.delay_ms.store(as_ms(delay), Ordering::SeqCst);
        }

        /// Writes attempted so far, failed ones included.
        pub fn attempts(&self) -> u32 {
            self.faults.attempts.load(Ordering::SeqCst)
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

pub struct FlakyLedgerStore {
    inner: Arc<dyn LedgerStore>,
    faults: Faults,
}

impl FlakyLedgerStore {
    /// A wrapper that behaves like `inner` until told otherwise.
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    /// A wrapper whose first `n` appends fail.
    pub fn failing(inner: Arc<dyn LedgerStore>, n: u32) -> Self {
        Self {
            inner,
            faults: Faults::with(n),
        }
    }

    fault_controls!();
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn append_batch(&self, events: &[AuditEvent]) -> LedgerResult<AppendResult> {
        if self.faults.trip() {
            return Err(LedgerError::Unavailable("injected ledger failure".into()));
        }
        self.faults.pause().await;
        self.inner.append_batch(events).await
    }

    async fn tail(&self) -> LedgerResult<ChainTail> {
        self.inner.tail().await
    }

    async fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        self.inner.range(from, to).await
    }

    async fn event(&self, seq: u64) -> LedgerResult<Option<AuditEvent>> {
        self.inner.event(seq).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content
// ─────────────────────────────────────────────────────────────────────────────

pub struct FlakyContentStore {
    inner: Arc<dyn ContentStore>,
    faults: Faults,
}

impl FlakyContentStore {
    pub fn new(inner: Arc<dyn ContentStore>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    /// A wrapper whose first `n` puts fail.
    pub fn failing(inner: Arc<dyn ContentStore>, n: u32) -> Self {
        Self {
            inner,
            faults: Faults::with(n),
        }
    }

    fault_controls!();

    /// Delay every `get` by `delay`.
    pub fn stall_reads(&self, delay: Duration) {
        self.faults.read_delay_ms.store(as_ms(delay), Ordering::SeqCst);
    }

    /// Flip the first bit of every blob returned by `get`.
    pub fn corrupt_reads(&self, on: bool) {
        self.faults.corrupt_reads.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn put(&self, hash: &ContentHash, blob: Bytes) -> sealvault_store::Result<PutResult> {
        if self.faults.trip() {
            return Err(StoreError::Unavailable("injected content store failure".into()));
        }
        self.faults.pause().await;
        self.inner.put(hash, blob).await
    }

    async fn get(&self, hash: &ContentHash) -> sealvault_store::Result<Option<Bytes>> {
        sleep_ms(self.faults.read_delay_ms.load(Ordering::SeqCst)).await;
        let blob = self.inner.get(hash).await?;
        if !self.faults.corrupt_reads.load(Ordering::SeqCst) {
            return Ok(blob);
        }
        Ok(blob.map(|blob| {
            let mut bytes = blob.to_vec();
            if let Some(first) = bytes.first_mut() {
                *first ^= 1;
            }
            Bytes::from(bytes)
        }))
    }

    async fn has(&self, hash: &ContentHash) -> sealvault_store::Result<bool> {
        self.inner.has(hash).await
    }

    async fn count(&self) -> sealvault_store::Result<u64> {
        self.inner.count().await
    }
}

#[cfg(test)]
mod tests {
    use sealvault_core::hash_content;
    use sealvault_store::{MemoryContentStore, MemoryLedgerStore};

    use super::*;

    #[test]
    fn test_trip_counts_down() {
        let faults = Faults::with(2);
        assert!(faults.trip());
        assert!(faults.trip());
        assert!(!faults.trip());
        assert_eq!(faults.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_always_never_runs_out() {
        let faults = Faults::with(ALWAYS);
        for _ in 0..1_000 {
            assert!(faults.trip());
        }
    }

    #[tokio::test]
    async fn test_flaky_content_recovers() {
        let store = FlakyContentStore::failing(Arc::new(MemoryContentStore::new()), 1);
        let blob = Bytes::from_static(b"ciphertext");
        let hash = hash_content(&blob);

        assert!(matches!(
            store.put(&hash, blob.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.put(&hash, blob).await.unwrap(), PutResult::Inserted);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_reads_flip_one_bit() {
        let store = FlakyContentStore::new(Arc::new(MemoryContentStore::new()));
        let blob = Bytes::from_static(b"ciphertext");
        let hash = hash_content(&blob);
        store.put(&hash, blob.clone()).await.unwrap();

        store.corrupt_reads(true);
        let got = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(got.len(), blob.len());
        assert_eq!(got[0], blob[0] ^ 1);
        assert_eq!(got[1..], blob[1..]);

        store.corrupt_reads(false);
        assert_eq!(store.get(&hash).await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn test_flaky_ledger_reads_pass_through() {
        let store = FlakyLedgerStore::new(Arc::new(MemoryLedgerStore::new()));
        store.fail_always();
        assert!(store.append_batch(&[]).await.is_err());
        assert_eq!(store.tail().await.unwrap(), ChainTail::EMPTY);
        store.heal();
        assert_eq!(store.attempts(), 1);
    }
}
