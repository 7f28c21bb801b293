//! The vault facade.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use sealvault_access::{
    AccessDecision, AccessRequest, Capability, FileScope, SealedFile, VaultIndex, VaultStats, Verdict,
};
use sealvault_core::{
    AuditEvent, CapabilityId, Clock, ContentHash, ConvergenceSecret, LedgerKeypair, LedgerPublicKey,
    PrincipalId, RequestId, SubmissionId, SystemClock,
};
use sealvault_store::{ContentStore, LedgerStore, MemoryContentStore, MemoryLedgerStore, SqliteStore};

use crate::access::{AccessControlEngine, DecisionOutcome, NewRequest};
use crate::config::VaultConfig;
use crate::error::{Operation, OperationExt, Result};
use crate::keyring::{DerivedKeyring, Keyring, MasterSecret};
use crate::ledger::AuditLedger;
use crate::pipeline::{Progress, SealingPipeline, SubmissionHandle, Upload, UploadStream};

/// Everything a vault is assembled from.
pub struct VaultParts {
    pub content: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub ledger_key: LedgerKeypair,
    pub keyring: Arc<dyn Keyring>,
    pub convergence: ConvergenceSecret,
    pub clock: Arc<dyn Clock>,
    pub config: VaultConfig,
}

impl VaultParts {
    /// Parts whose keys all derive from `master`, on the system clock.
    pub fn derived(
        content: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerStore>,
        master: MasterSecret,
        config: VaultConfig,
    ) -> Self {
        Self {
            content,
            ledger,
            ledger_key: master.ledger_keypair(),
            convergence: master.convergence_secret(),
            keyring: Arc::new(DerivedKeyring::new(master)),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct Vault {
    ledger: Arc<AuditLedger>,
    pipeline: SealingPipeline,
    access: AccessControlEngine,
    clock: Arc<dyn Clock>,
}

impl Vault {
    /// Open a vault over the given stores, replaying the ledger.
    pub async fn open(
        content: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerStore>,
        master: MasterSecret,
        config: VaultConfig,
    ) -> Result<Self> {
        Self::open_with(VaultParts::derived(content, ledger, master, config)).await
    }

    /// Open a vault backed by one SQLite database file.
    pub async fn open_sqlite(path: impl AsRef<Path>, master: MasterSecret, config: VaultConfig) -> Result<Self> {
        let store = SqliteStore::open(path).during(Operation::Open)?;
        Self::open(Arc::new(store.clone()), Arc::new(store), master, config).await
    }

    /// A throwaway vault with fresh keys and in-memory stores.
    pub async fn in_memory(config: VaultConfig) -> Result<Self> {
        Self::open(
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryLedgerStore::new()),
            MasterSecret::generate(),
            config,
        )
        .await
    }

    pub async fn open_with(parts: VaultParts) -> Result<Self> {
        let VaultParts {
            content,
            ledger,
            ledger_key,
            keyring,
            convergence,
            clock,
            config,
        } = parts;

        let ledger = Arc::new(
            AuditLedger::open(ledger, ledger_key, config.ledger.clone())
                .await
                .during(Operation::Open)?,
        );
        let pipeline = SealingPipeline::new(
            content.clone(),
            ledger.clone(),
            keyring.clone(),
            convergence,
            clock.clone(),
            config.sealing.clone(),
        );
        let access = AccessControlEngine::new(
            ledger.clone(),
            content,
            keyring,
            clock.clone(),
            config.access.clone(),
            &config.sealing,
        );

        Ok(Self {
            ledger,
            pipeline,
            access,
            clock,
        })
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    pub fn submit(&self, upload: Upload, stream: UploadStream) -> SubmissionHandle {
        self.pipeline.submit(upload, stream)
    }

    pub async fn seal_bytes(&self, upload: Upload, data: impl Into<Bytes>) -> Result<SealedFile> {
        self.pipeline.seal_bytes(upload, data.into()).await
    }

    pub fn submission(&self, id: &SubmissionId) -> Option<Progress> {
        self.pipeline.status(id)
    }

    pub fn cancel_submission(&self, id: &SubmissionId) -> Option<bool> {
        self.pipeline.cancel(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn submit_request(&self, request: NewRequest) -> Result<AccessRequest> {
        self.access.submit_request(request).await
    }

    pub async fn decide(&self, id: RequestId, owner: &PrincipalId, verdict: Verdict) -> Result<DecisionOutcome> {
        self.access.decide(id, owner, verdict).await
    }

    pub async fn grant(
        &self,
        owner: &PrincipalId,
        grantee: PrincipalId,
        scope: FileScope,
        duration_secs: u64,
    ) -> Result<Capability> {
        self.access.grant(owner, grantee, scope, duration_secs).await
    }

    pub async fn revoke(&self, id: CapabilityId, owner: &PrincipalId) -> Result<Capability> {
        self.access.revoke(id, owner).await
    }

    pub async fn renew(&self, id: CapabilityId, owner: &PrincipalId, duration_secs: u64) -> Result<Capability> {
        self.access.renew(id, owner, duration_secs).await
    }

    /// Check a capability against the vault clock.
    pub async fn check_access(&self, id: CapabilityId, hash: &ContentHash) -> Result<AccessDecision> {
        self.access.check_access(id, hash, self.now()).await
    }

    pub async fn check_access_at(&self, id: CapabilityId, hash: &ContentHash, now: i64) -> Result<AccessDecision> {
        self.access.check_access(id, hash, now).await
    }

    pub async fn read_file(
        &self,
        principal: &PrincipalId,
        hash: &ContentHash,
        capability: Option<CapabilityId>,
    ) -> Result<Bytes> {
        self.access.read_file(principal, hash, capability, self.now()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn file(&self, hash: &ContentHash) -> Option<SealedFile> {
        self.ledger.with_index(|ix| ix.file(hash).cloned())
    }

    pub fn files_of(&self, owner: &PrincipalId) -> Vec<SealedFile> {
        self.ledger.with_index(|ix| ix.files_of(owner).into_iter().cloned().collect())
    }

    pub fn capability(&self, id: &CapabilityId) -> Option<Capability> {
        self.ledger.with_index(|ix| ix.capability(id).cloned())
    }

    pub fn capabilities_of(&self, owner: &PrincipalId) -> Vec<Capability> {
        self.ledger
            .with_index(|ix| ix.capabilities_of(owner).into_iter().cloned().collect())
    }

    pub fn capabilities_held_by(&self, grantee: &PrincipalId) -> Vec<Capability> {
        self.ledger
            .with_index(|ix| ix.capabilities_held_by(grantee).into_iter().cloned().collect())
    }

    pub fn request(&self, id: &RequestId) -> Option<AccessRequest> {
        self.ledger.with_index(|ix| ix.request(id).cloned())
    }

    pub fn requests_for(&self, owner: &PrincipalId, pending_only: bool) -> Vec<AccessRequest> {
        self.ledger
            .with_index(|ix| ix.requests_for(owner, pending_only).into_iter().cloned().collect())
    }

    /// Dashboard counts for `owner` as of now.
    pub fn stats(&self, owner: &PrincipalId) -> VaultStats {
        let now = self.now();
        self.ledger.with_index(|ix| ix.stats(owner, now))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    /// Audit events with `from <= seq < to`.
    pub async fn audit(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>> {
        self.ledger.range(from, to).await.during(Operation::Audit)
    }

    pub async fn audit_len(&self) -> u64 {
        self.ledger.len().await
    }

    pub async fn verify_chain(&self, from: u64, to: u64) -> Result<bool> {
        self.ledger.verify_chain(from, to).await.during(Operation::Audit)
    }

    /// Rebuild the index from genesis, independently of the live one.
    pub async fn replay(&self) -> Result<VaultIndex> {
        self.ledger.replay().await.during(Operation::Audit)
    }

    pub fn ledger_key(&self) -> LedgerPublicKey {
        self.ledger.public_key()
    }
}
