//! The sealing pipeline.
//!
//! Each submission runs as its own task through four stages:
//!
//! ```text
//! Uploading (0-40%) -> Encrypting (40-70%) -> Committing (70-99%) -> Sealed (100%)
//! ```
//!
//! Any non-terminal stage can end in `Failed`. Nothing is written to a store
//! before `Committing`, so a submission cancelled or failed earlier leaves no
//! trace. Once `Committing` is entered the submission can no longer be
//! cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use sealvault_access::{encode_detail, FileStatus, SealedFile};
use sealvault_core::{
    derive_file_key, encrypt, encrypt_with_nonce, generate_file_key, wrap_key, AuditKind, Clock,
    ContentHash, ConvergenceSecret, CryptoError, EventDraft, IntegrityTag, PrincipalId, Subject,
    SubmissionId,
};
use sealvault_store::{ContentStore, PutResult};

use crate::config::SealingConfig;
use crate::error::{Cause, ErrorKind, Result, Stage, VaultError};
use crate::keyring::Keyring;
use crate::ledger::AuditLedger;
use crate::locks::KeyedLocks;
use crate::retry::{retry, RetryPolicy};

/// Raw bytes of an upload, in chunks.
pub type UploadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Metadata accompanying an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub owner: PrincipalId,
    pub name: String,
    pub mime: String,
    /// Declared length, if the caller knows it. Drives upload progress.
    pub size_hint: Option<u64>,
}

impl Upload {
    pub fn new(owner: PrincipalId, name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            mime: mime.into(),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

/// Where a submission is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Uploading,
    Encrypting,
    Committing,
    Sealed {
        file: ContentHash,
    },
    Failed {
        stage: Stage,
        kind: ErrorKind,
        reason: String,
    },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sealed { .. } | Self::Failed { .. })
    }

    /// The stage a failure at this point is attributed to.
    fn stage(&self) -> Stage {
        match self {
            Self::Uploading => Stage::Uploading,
            Self::Encrypting => Stage::Encrypting,
            Self::Committing | Self::Sealed { .. } => Stage::Committing,
            Self::Failed { stage, .. } => *stage,
        }
    }
}

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub submission: SubmissionId,
    #[serde(flatten)]
    pub state: PipelineState,
    pub percent: u8,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Cancelled,
    Committing,
}

/// Decides, race-free, whether a cancel lands before `Committing`.
struct Control {
    gate: Mutex<Gate>,
    notify: Notify,
}

impl Control {
    fn new() -> Self {
        Self {
            gate: Mutex::new(Gate::Open),
            notify: Notify::new(),
        }
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self) -> bool {
        let mut gate = self.gate();
        match *gate {
            Gate::Open | Gate::Cancelled => {
                *gate = Gate::Cancelled;
                drop(gate);
                self.notify.notify_waiters();
                true
            }
            Gate::Committing => false,
        }
    }

    fn checkpoint(&self, stage: Stage) -> Result<()> {
        match *self.gate() {
            Gate::Cancelled => Err(VaultError::sealing(stage, Cause::Cancelled)),
            Gate::Open | Gate::Committing => Ok(()),
        }
    }

    fn enter_commit(&self) -> Result<()> {
        let mut gate = self.gate();
        match *gate {
            Gate::Cancelled => Err(VaultError::sealing(Stage::Encrypting, Cause::Cancelled)),
            Gate::Open | Gate::Committing => {
                *gate = Gate::Committing;
                Ok(())
            }
        }
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            let cancelled = *self.gate() == Gate::Cancelled;
            if cancelled {
                return;
            }
            notified.await;
        }
    }
}

/// A running submission.
pub struct SubmissionHandle {
    id: SubmissionId,
    progress: watch::Receiver<Progress>,
    control: Arc<Control>,
    task: JoinHandle<Result<SealedFile>>,
}

impl SubmissionHandle {
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    /// A receiver that sees every stage transition.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// The latest progress notification.
    pub fn current(&self) -> Progress {
        self.progress.borrow().clone()
    }

    /// Ask the submission to stop. Returns `false` once it is committing.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Wait for the submission to finish.
    pub async fn wait(self) -> Result<SealedFile> {
        let stage = self.progress.borrow().state.stage();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(VaultError::sealing(stage, Cause::Internal(e.to_string()))),
        }
    }
}

struct Tracked {
    progress: Progress,
    control: Arc<Control>,
}

/// Ciphertext and key material ready to commit.
struct Encrypted {
    id: ContentHash,
    blob: Bytes,
    tag: IntegrityTag,
    envelope: Vec<u8>,
    size: u64,
}

struct Job {
    id: SubmissionId,
    upload: Upload,
    control: Arc<Control>,
    tx: watch::Sender<Progress>,
    bytes_received: u64,
}

/// Runs sealing submissions.
#[derive(Clone)]
pub struct SealingPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    content: Arc<dyn ContentStore>,
    ledger: Arc<AuditLedger>,
    keyring: Arc<dyn Keyring>,
    convergence: ConvergenceSecret,
    clock: Arc<dyn Clock>,
    config: SealingConfig,
    store_policy: RetryPolicy,
    commit_locks: KeyedLocks<ContentHash>,
    submissions: RwLock<HashMap<SubmissionId, Tracked>>,
    /// Finished submissions, oldest first.
    finished: Mutex<VecDeque<SubmissionId>>,
    permits: Arc<Semaphore>,
}

impl SealingPipeline {
    pub fn new(
        content: Arc<dyn ContentStore>,
        ledger: Arc<AuditLedger>,
        keyring: Arc<dyn Keyring>,
        convergence: ConvergenceSecret,
        clock: Arc<dyn Clock>,
        config: SealingConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            inner: Arc::new(Inner {
                content,
                ledger,
                keyring,
                convergence,
                clock,
                store_policy: RetryPolicy::from(&config),
                config,
                commit_locks: KeyedLocks::new(),
                submissions: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
                permits,
            }),
        }
    }

    /// Start sealing a stream of bytes. Must be called within a tokio runtime.
    pub fn submit(&self, upload: Upload, stream: UploadStream) -> SubmissionHandle {
        let id = SubmissionId::generate();
        let control = Arc::new(Control::new());
        let initial = Progress {
            submission: id,
            state: PipelineState::Uploading,
            percent: 0,
            bytes_received: 0,
        };
        let (tx, rx) = watch::channel(initial.clone());

        self.inner.submissions_mut().insert(
            id,
            Tracked {
                progress: initial,
                control: control.clone(),
            },
        );

        let job = Job {
            id,
            upload,
            control: control.clone(),
            tx,
            bytes_received: 0,
        };
        let task = tokio::spawn(self.inner.clone().run(job, stream));

        SubmissionHandle {
            id,
            progress: rx,
            control,
            task,
        }
    }

    /// Seal an in-memory buffer and wait for the result.
    pub async fn seal_bytes(&self, upload: Upload, data: Bytes) -> Result<SealedFile> {
        let upload = upload.with_size_hint(data.len() as u64);
        let stream = stream::once(async move { Ok(data) }).boxed();
        self.submit(upload, stream).wait().await
    }

    /// Latest progress of a submission. Finished ones are kept until
    /// `retain_finished` newer submissions have finished.
    pub fn status(&self, id: &SubmissionId) -> Option<Progress> {
        self.inner
            .submissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|t| t.progress.clone())
    }

    /// Cancel a submission by id. `None` if it is unknown.
    pub fn cancel(&self, id: &SubmissionId) -> Option<bool> {
        self.inner
            .submissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|t| t.control.cancel())
    }
}

impl Inner {
    fn submissions_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SubmissionId, Tracked>> {
        self.submissions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, job: &Job, state: PipelineState, percent: u8) {
        let progress = Progress {
            submission: job.id,
            state,
            percent,
            bytes_received: job.bytes_received,
        };
        if let Some(tracked) = self.submissions_mut().get_mut(&job.id) {
            tracked.progress = progress.clone();
        }
        job.tx.send_replace(progress);
    }

    async fn run(self: Arc<Self>, mut job: Job, stream: UploadStream) -> Result<SealedFile> {
        let result = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => self.process(&mut job, stream).await,
            Err(e) => Err(VaultError::sealing(Stage::Uploading, Cause::Internal(e.to_string()))),
        };

        match &result {
            Ok(file) => self.report(&job, PipelineState::Sealed { file: file.id }, 100),
            Err(e) => {
                let percent = job.tx.borrow().percent;
                let stage = e.stage.unwrap_or(Stage::Uploading);
                tracing::warn!(
                    submission = %job.id,
                    stage = %stage,
                    kind = %e.kind(),
                    error = %e.cause,
                    "sealing failed"
                );
                self.report(
                    &job,
                    PipelineState::Failed {
                        stage,
                        kind: e.kind(),
                        reason: e.cause.to_string(),
                    },
                    percent,
                );
            }
        }
        self.retire(job.id);
        result
    }

    /// Remember `id` as finished and forget the oldest beyond the limit.
    fn retire(&self, id: SubmissionId) {
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished.push_back(id);
        let excess = finished.len().saturating_sub(self.config.retain_finished);
        if excess == 0 {
            return;
        }
        let mut submissions = self.submissions_mut();
        for old in finished.drain(..excess) {
            submissions.remove(&old);
        }
    }

    async fn process(&self, job: &mut Job, stream: UploadStream) -> Result<SealedFile> {
        job.control.checkpoint(Stage::Uploading)?;
        let plaintext = self.receive(job, stream).await?;
        job.control.checkpoint(Stage::Uploading)?;

        self.report(job, PipelineState::Encrypting, 40);
        let encrypted = self.encrypt(&job.upload.owner, plaintext).await?;
        self.report(job, PipelineState::Encrypting, 60);

        job.control.enter_commit()?;
        self.report(job, PipelineState::Committing, 70);
        self.commit(job, encrypted).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Uploading
    // ─────────────────────────────────────────────────────────────────────────

    async fn receive(&self, job: &mut Job, mut stream: UploadStream) -> Result<Vec<u8>> {
        let max = self.config.max_file_size;
        let hint = job.upload.size_hint;
        if let Some(size) = hint {
            if size > max {
                return Err(too_large(size, max));
            }
        }

        let control = job.control.clone();
        let capacity = usize::try_from(hint.unwrap_or(0)).unwrap_or(0);
        let mut buf = Vec::with_capacity(capacity);
        let mut chunks = 0u64;

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = control.cancelled() => {
                    return Err(VaultError::sealing(Stage::Uploading, Cause::Cancelled));
                }
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| VaultError::sealing(Stage::Uploading, Cause::Io(e.to_string())))?;

            let received = buf.len() as u64 + chunk.len() as u64;
            if received > max {
                return Err(too_large(received, max));
            }
            buf.extend_from_slice(&chunk);
            chunks += 1;
            job.bytes_received = received;

            if self.config.chunk_progress {
                self.report(job, PipelineState::Uploading, upload_percent(received, hint, chunks));
            }
        }

        Ok(buf)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encrypting
    // ─────────────────────────────────────────────────────────────────────────

    async fn encrypt(&self, owner: &PrincipalId, plaintext: Vec<u8>) -> Result<Encrypted> {
        let owner_key = self.keyring.public_key(owner);
        let convergence = self.config.convergent_keys.then(|| self.convergence.clone());
        let owner = owner.clone();

        let work = tokio::task::spawn_blocking(move || -> std::result::Result<Encrypted, CryptoError> {
            let (key, (ciphertext, tag)) = match convergence {
                Some(secret) => {
                    let (key, nonce) = derive_file_key(&secret, &owner, &plaintext);
                    let sealed = encrypt_with_nonce(&plaintext, &key, nonce)?;
                    (key, sealed)
                }
                None => {
                    let key = generate_file_key()?;
                    let sealed = encrypt(&plaintext, &key)?;
                    (key, sealed)
                }
            };
            let id = ciphertext.content_hash();
            let envelope = wrap_key(&key, &owner_key, &id)?.to_bytes()?;
            Ok(Encrypted {
                id,
                blob: Bytes::from(ciphertext.to_blob()),
                tag,
                envelope,
                size: plaintext.len() as u64,
            })
        });

        match work.await {
            Ok(result) => result.map_err(|e| VaultError::sealing(Stage::Encrypting, e)),
            Err(e) => Err(VaultError::sealing(Stage::Encrypting, Cause::Internal(e.to_string()))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Committing
    // ─────────────────────────────────────────────────────────────────────────

    async fn commit(&self, job: &Job, encrypted: Encrypted) -> Result<SealedFile> {
        let failed = |cause: Cause| VaultError::sealing(Stage::Committing, cause);
        let owner = &job.upload.owner;
        let _guard = self.commit_locks.lock(encrypted.id).await;

        if let Some(existing) = self.ledger.with_index(|ix| ix.file(&encrypted.id).cloned()) {
            if &existing.owner != owner {
                return Err(failed(Cause::InvalidState(format!(
                    "content {} is sealed by another owner",
                    existing.id
                ))));
            }
            tracing::debug!(file = %existing.id, "content already sealed");
            return Ok(existing);
        }

        let put = retry(&self.store_policy, "put", || {
            self.content.put(&encrypted.id, encrypted.blob.clone())
        })
        .await
        .map_err(|e| failed(e.into()))?;
        if put == PutResult::AlreadyExists {
            tracing::debug!(file = %encrypted.id, "blob already stored");
        }
        self.report(job, PipelineState::Committing, 85);

        let now = self.clock.now_millis();
        let file = SealedFile {
            id: encrypted.id,
            owner: owner.clone(),
            name: job.upload.name.clone(),
            mime: job.upload.mime.clone(),
            size: encrypted.size,
            integrity_tag: encrypted.tag,
            key_envelope: encrypted.envelope,
            created_at: now,
            status: FileStatus::Sealed,
        };
        let detail = encode_detail(&file).map_err(|e| failed(e.into()))?;
        let draft = EventDraft::new(
            AuditKind::FileSealed,
            owner.clone(),
            Subject::File(file.id),
            now,
            detail,
        );
        self.ledger.append(draft).await.map_err(|e| failed(e.into()))?;
        self.report(job, PipelineState::Committing, 99);

        tracing::info!(file = %file.id, owner = %file.owner, size = file.size, "sealed file");
        Ok(file)
    }
}

fn too_large(size: u64, max: u64) -> VaultError {
    VaultError::sealing(
        Stage::Uploading,
        Cause::InvalidInput(format!("upload of {size} bytes exceeds the {max} byte limit")),
    )
}

/// Upload progress within the 0-40 band.
///
/// Proportional when the total is known; otherwise each chunk closes part
/// of the remaining distance without ever reaching 40.
fn upload_percent(received: u64, total: Option<u64>, chunks: u64) -> u8 {
    let percent = match total {
        Some(total) if total > 0 => received.saturating_mul(40) / total,
        _ => 40 - 40 / (chunks + 1),
    };
    percent.min(39) as u8
}
