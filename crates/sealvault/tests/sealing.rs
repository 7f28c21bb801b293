//! Sealing pipeline behavior end to end.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};

use sealvault::{ErrorKind, Keyring, MasterSecret, MemoryKeyring, PipelineState, Stage, Upload, Vault, VaultParts};
use sealvault_core::{AuditKind, X25519PublicKey, X25519StaticSecret};
use sealvault_store::{ContentStore, LedgerStore, MemoryContentStore, MemoryLedgerStore};
use sealvault_testkit::{fast_config, parties, principal, FlakyContentStore, FlakyLedgerStore, TestVault};

fn upload(owner: &sealvault::PrincipalId, name: &str) -> Upload {
    Upload::new(owner.clone(), name, "application/pdf")
}

#[tokio::test]
async fn test_seal_and_owner_read() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();

    let file = tv.seal(&alice, "report-A.pdf", b"report-A").await;
    assert_eq!(file.owner, alice);
    assert_eq!(file.size, 8);
    assert_eq!(file.name, "report-A.pdf");
    assert_eq!(file.status, sealvault::FileStatus::Sealed);

    let bytes = tv.vault.read_file(&alice, &file.id, None).await.unwrap();
    assert_eq!(&bytes[..], b"report-A");

    let events = tv.vault.audit(0, 10).await.unwrap();
    let kinds: Vec<AuditKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![AuditKind::FileSealed, AuditKind::FileAccessed]);
}

#[tokio::test]
async fn test_sealing_twice_is_idempotent() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();

    let first = tv.seal(&alice, "a.pdf", b"same bytes").await;
    let second = tv.seal(&alice, "a-copy.pdf", b"same bytes").await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.name, "a.pdf");
    assert_eq!(tv.content.count().await.unwrap(), 1);
    assert_eq!(tv.vault.audit_len().await, 1);
}

#[tokio::test]
async fn test_concurrent_identical_seals_produce_one_record() {
    let tv = Arc::new(TestVault::new().await);
    let (alice, _, _) = parties();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let (tv, alice) = (tv.clone(), alice.clone());
        tasks.push(tokio::spawn(async move {
            tv.seal(&alice, &format!("copy-{i}"), b"shared content").await.id
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        ids.push(t.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(tv.content.count().await.unwrap(), 1);
    assert_eq!(tv.vault.audit_len().await, 1);
}

#[tokio::test]
async fn test_owners_never_share_a_hash() {
    let tv = TestVault::new().await;
    let a = tv.seal(&principal("alice"), "x", b"identical").await;
    let b = tv.seal(&principal("bob"), "x", b"identical").await;
    assert_ne!(a.id, b.id);
    assert_eq!(tv.content.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_random_keys_when_convergence_is_off() {
    let mut config = fast_config();
    config.sealing.convergent_keys = false;
    let tv = TestVault::with_config(config).await;
    let (alice, _, _) = parties();

    let a = tv.seal(&alice, "x", b"identical").await;
    let b = tv.seal(&alice, "x", b"identical").await;
    assert_ne!(a.id, b.id);
    assert_eq!(&tv.vault.read_file(&alice, &b.id, None).await.unwrap()[..], b"identical");
}

#[tokio::test]
async fn test_empty_upload_is_sealed() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();
    let file = tv.seal(&alice, "empty", b"").await;
    assert_eq!(file.size, 0);
    assert!(tv.vault.read_file(&alice, &file.id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chunked_upload_reports_progress() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();

    let chunks: Vec<std::io::Result<Bytes>> = (0..4u8).map(|i| Ok(Bytes::from(vec![i; 1024]))).collect();
    let handle = tv
        .vault
        .submit(upload(&alice, "scan.bin").with_size_hint(4096), stream::iter(chunks).boxed());
    let id = handle.id();

    let mut rx = handle.progress();
    let watcher = tokio::spawn(async move {
        let mut seen = vec![rx.borrow().percent];
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow().percent);
        }
        seen
    });

    let file = handle.wait().await.unwrap();
    let seen = watcher.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last(), Some(&100));

    let status = tv.vault.submission(&id).unwrap();
    assert_eq!(status.state, PipelineState::Sealed { file: file.id });
    assert_eq!(status.percent, 100);
    assert_eq!(status.bytes_received, 4096);
    assert_eq!(tv.vault.read_file(&alice, &file.id, None).await.unwrap().len(), 4096);
}

#[tokio::test]
async fn test_stream_error_fails_uploading() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();

    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let handle = tv.vault.submit(upload(&alice, "broken"), stream::iter(chunks).boxed());
    let id = handle.id();
    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.stage, Some(Stage::Uploading));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(matches!(
        tv.vault.submission(&id).unwrap().state,
        PipelineState::Failed { stage: Stage::Uploading, kind: ErrorKind::Io, .. }
    ));
    assert_eq!(tv.content.count().await.unwrap(), 0);
    assert_eq!(tv.vault.audit_len().await, 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let mut config = fast_config();
    config.sealing.max_file_size = 16;
    let tv = TestVault::with_config(config).await;
    let (alice, _, _) = parties();

    let err = tv
        .vault
        .seal_bytes(upload(&alice, "big"), vec![0u8; 17])
        .await
        .unwrap_err();
    assert_eq!(err.stage, Some(Stage::Uploading));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from(vec![1u8; 10])), Ok(Bytes::from(vec![2u8; 10]))];
    let err = tv
        .vault
        .submit(upload(&alice, "big"), stream::iter(chunks).boxed())
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(tv.vault.audit_len().await, 0);
}

#[tokio::test]
async fn test_cancel_during_upload_leaves_nothing() {
    let tv = TestVault::new().await;
    let (alice, _, _) = parties();

    let endless = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"first chunk")) })
        .chain(stream::pending())
        .boxed();
    let handle = tv.vault.submit(upload(&alice, "endless"), endless);
    let id = handle.id();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tv.vault.cancel_submission(&id), Some(true));

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.stage, Some(Stage::Uploading));
    assert_eq!(tv.content.count().await.unwrap(), 0);
    assert_eq!(tv.vault.audit_len().await, 0);
    assert!(tv.vault.files_of(&alice).is_empty());
}

/// Blocks the first public key lookup until released, which holds a
/// submission inside `Encrypting`.
struct HeldKeyring {
    inner: MemoryKeyring,
    release: std::sync::Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl Keyring for HeldKeyring {
    fn secret(&self, principal: &sealvault::PrincipalId) -> X25519StaticSecret {
        self.inner.secret(principal)
    }

    fn public_key(&self, principal: &sealvault::PrincipalId) -> X25519PublicKey {
        let held = self.release.lock().unwrap().take();
        if let Some(release) = held {
            let _ = release.recv();
        }
        self.inner.public_key(principal)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_encrypting_leaves_nothing() {
    let (release, held) = std::sync::mpsc::channel();
    let content = Arc::new(MemoryContentStore::new());
    let mut parts = VaultParts::derived(
        content.clone(),
        Arc::new(MemoryLedgerStore::new()),
        MasterSecret::from_bytes([1; 32]),
        fast_config(),
    );
    parts.keyring = Arc::new(HeldKeyring {
        inner: MemoryKeyring::new(),
        release: std::sync::Mutex::new(Some(held)),
    });
    let vault = Vault::open_with(parts).await.unwrap();
    let (alice, _, _) = parties();

    let one = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"report-A")) }).boxed();
    let handle = vault.submit(upload(&alice, "held"), one);
    let id = handle.id();

    let mut progress = handle.progress();
    while progress.borrow_and_update().state != PipelineState::Encrypting {
        progress.changed().await.unwrap();
    }
    assert_eq!(vault.cancel_submission(&id), Some(true));
    release.send(()).unwrap();

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.stage, Some(Stage::Encrypting));
    assert!(matches!(
        vault.submission(&id).unwrap().state,
        PipelineState::Failed { stage: Stage::Encrypting, kind: ErrorKind::Cancelled, .. }
    ));
    assert_eq!(content.count().await.unwrap(), 0);
    assert_eq!(vault.audit_len().await, 0);
    assert!(vault.files_of(&alice).is_empty());
}

#[tokio::test]
async fn test_finished_submissions_are_forgotten_oldest_first() {
    let mut config = fast_config();
    config.sealing.retain_finished = 2;
    let tv = TestVault::with_config(config).await;
    let (alice, _, _) = parties();

    let endless = stream::pending().boxed();
    let running = tv.vault.submit(upload(&alice, "running"), endless);

    let mut done = Vec::new();
    for i in 0..3u8 {
        let data = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(vec![i; 8])) }).boxed();
        let handle = tv.vault.submit(upload(&alice, &format!("file-{i}")), data);
        done.push(handle.id());
        handle.wait().await.unwrap();
    }

    assert!(tv.vault.submission(&done[0]).is_none());
    assert!(tv.vault.cancel_submission(&done[0]).is_none());
    for id in &done[1..] {
        assert!(matches!(tv.vault.submission(id).unwrap().state, PipelineState::Sealed { .. }));
    }
    // Unfinished submissions are never dropped.
    assert_eq!(tv.vault.submission(&running.id()).unwrap().state, PipelineState::Uploading);

    let running_id = running.id();
    assert_eq!(tv.vault.cancel_submission(&running_id), Some(true));
    assert_eq!(running.wait().await.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(tv.vault.submission(&running_id).is_some());
    assert!(tv.vault.submission(&done[1]).is_none());
    assert!(tv.vault.submission(&done[2]).is_some());
}

#[tokio::test]
async fn test_unknown_submission() {
    let tv = TestVault::new().await;
    let id = sealvault::SubmissionId::generate();
    assert!(tv.vault.submission(&id).is_none());
    assert!(tv.vault.cancel_submission(&id).is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Store and ledger failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ledger_down_fails_committing() {
    let ledger = Arc::new(FlakyLedgerStore::new(Arc::new(MemoryLedgerStore::new())));
    let tv = TestVault::open(
        Arc::new(MemoryContentStore::new()),
        ledger.clone(),
        sealvault::MasterSecret::from_bytes([1; 32]),
        fast_config(),
    )
    .await;
    let (alice, _, _) = parties();
    ledger.fail_always();

    let err = tv
        .vault
        .seal_bytes(upload(&alice, "report"), &b"report-A"[..])
        .await
        .unwrap_err();
    assert_eq!(err.stage, Some(Stage::Committing));
    assert_eq!(err.kind(), ErrorKind::LedgerUnavailable);
    assert_eq!(ledger.attempts(), tv.config.ledger.max_attempts);

    // The blob may be stored, but nothing addresses it as sealed.
    assert!(tv.vault.files_of(&alice).is_empty());
    assert_eq!(tv.vault.audit_len().await, 0);

    ledger.heal();
    let file = tv.seal(&alice, "report", b"report-A").await;
    assert_eq!(tv.content.count().await.unwrap(), 1);
    assert_eq!(tv.vault.file(&file.id), Some(file));
    assert!(tv.vault.verify_chain(0, 1).await.unwrap());
}

#[tokio::test]
async fn test_ledger_failing_within_bound_still_seals() {
    let ledger = Arc::new(FlakyLedgerStore::new(Arc::new(MemoryLedgerStore::new())));
    let tv = TestVault::open(
        Arc::new(MemoryContentStore::new()),
        ledger.clone(),
        sealvault::MasterSecret::from_bytes([1; 32]),
        fast_config(),
    )
    .await;
    let (alice, _, _) = parties();
    ledger.fail_next(tv.config.ledger.max_attempts - 1);

    let file = tv.seal(&alice, "report", b"report-A").await;
    assert_eq!(tv.vault.audit_len().await, 1);
    assert_eq!(ledger.attempts(), tv.config.ledger.max_attempts);
    assert_eq!(&tv.vault.read_file(&alice, &file.id, None).await.unwrap()[..], b"report-A");
}

#[tokio::test]
async fn test_timed_out_append_is_not_duplicated() {
    let ledger = Arc::new(FlakyLedgerStore::new(Arc::new(MemoryLedgerStore::new())));
    let mut config = fast_config();
    config.ledger.timeout_ms = 50;
    config.ledger.max_attempts = 1;
    let tv = TestVault::open(
        Arc::new(MemoryContentStore::new()),
        ledger.clone(),
        sealvault::MasterSecret::from_bytes([1; 32]),
        config,
    )
    .await;
    let (alice, _, _) = parties();

    ledger.stall(Duration::from_millis(200));
    let err = tv
        .vault
        .seal_bytes(upload(&alice, "slow"), &b"slow"[..])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerUnavailable);

    ledger.stall(Duration::ZERO);
    let other = tv.seal(&alice, "fast", b"fast").await;

    // Whatever the abandoned write did, the chain stays linear and verifiable.
    let len = tv.vault.audit_len().await;
    assert!(len >= 1);
    assert!(tv.vault.verify_chain(0, len).await.unwrap());
    assert_eq!(tv.vault.file(&other.id).map(|f| f.id), Some(other.id));
    let tail = ledger.tail().await.unwrap();
    assert_eq!(tail.len, len);
}

#[tokio::test]
async fn test_transient_content_store_failure_is_retried() {
    let content = Arc::new(FlakyContentStore::failing(Arc::new(MemoryContentStore::new()), 2));
    let tv = TestVault::open(
        content.clone(),
        Arc::new(MemoryLedgerStore::new()),
        sealvault::MasterSecret::from_bytes([1; 32]),
        fast_config(),
    )
    .await;
    let (alice, _, _) = parties();

    let file = tv.seal(&alice, "report", b"report-A").await;
    assert_eq!(content.attempts(), 3);
    assert_eq!(&tv.vault.read_file(&alice, &file.id, None).await.unwrap()[..], b"report-A");
}

#[tokio::test]
async fn test_content_store_down_fails_with_io() {
    let content = Arc::new(FlakyContentStore::new(Arc::new(MemoryContentStore::new())));
    let tv = TestVault::open(
        content.clone(),
        Arc::new(MemoryLedgerStore::new()),
        sealvault::MasterSecret::from_bytes([1; 32]),
        fast_config(),
    )
    .await;
    let (alice, _, _) = parties();
    content.fail_always();

    let err = tv
        .vault
        .seal_bytes(upload(&alice, "report"), &b"report-A"[..])
        .await
        .unwrap_err();
    assert_eq!(err.stage, Some(Stage::Committing));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.is_retryable());
    assert_eq!(tv.vault.audit_len().await, 0);
}
