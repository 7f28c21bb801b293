//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use sealvault::{
    Capability, ErrorKind, FileScope, MasterSecret, NewRequest, SealedFile, Upload, Vault, VaultConfig,
    VaultParts, Verdict,
};
use sealvault_core::{ManualClock, PrincipalId};
use sealvault_store::{ContentStore, LedgerStore, MemoryContentStore, MemoryLedgerStore};

use crate::generators::VaultOp;

/// Start of fixture time: 2023-11-14T22:13:20Z.
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub const DAY_SECS: u64 = 24 * 60 * 60;

/// A principal named `0x{name}`.
pub fn principal(name: &str) -> PrincipalId {
    PrincipalId::new(format!("0x{name}")).expect("fixture principal is valid")
}

/// Config with short timeouts and backoff so failure tests run quickly.
pub fn fast_config() -> VaultConfig {
    let mut config = VaultConfig::default();
    config.ledger.retry_backoff_ms = 1;
    config.ledger.timeout_ms = 500;
    config.sealing.store_retry_backoff_ms = 1;
    config.sealing.store_timeout_ms = 500;
    config
}

/// A vault on a manual clock, with handles to its stores.
pub struct TestVault {
    pub vault: Vault,
    pub clock: Arc<ManualClock>,
    pub content: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub master: MasterSecret,
    pub config: VaultConfig,
}

impl TestVault {
    /// A vault over fresh in-memory stores.
    pub async fn new() -> Self {
        Self::with_config(fast_config()).await
    }

    pub async fn with_config(config: VaultConfig) -> Self {
        Self::open(
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryLedgerStore::new()),
            MasterSecret::from_bytes([7; 32]),
            config,
        )
        .await
    }

    /// A vault over the given stores.
    pub async fn open(
        content: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerStore>,
        master: MasterSecret,
        config: VaultConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let parts = VaultParts::derived(content.clone(), ledger.clone(), master.clone(), config.clone())
            .with_clock(clock.clone());
        let vault = Vault::open_with(parts).await.expect("fixture vault opens");
        Self {
            vault,
            clock,
            content,
            ledger,
            master,
            config,
        }
    }

    /// Drop the vault and open a new one over the same stores and secret.
    pub async fn reopen(self) -> Self {
        let Self {
            vault,
            content,
            ledger,
            master,
            config,
            ..
        } = self;
        drop(vault);
        Self::open(content, ledger, master, config).await
    }

    /// Seal `data` as `owner` and return the record.
    pub async fn seal(&self, owner: &PrincipalId, name: &str, data: &[u8]) -> SealedFile {
        self.vault
            .seal_bytes(Upload::new(owner.clone(), name, "application/octet-stream"), data.to_vec())
            .await
            .expect("fixture seal succeeds")
    }

    /// Submit a request and have the owner approve it.
    pub async fn approved_capability(
        &self,
        owner: &PrincipalId,
        requester: &PrincipalId,
        scope: FileScope,
        duration_secs: u64,
    ) -> Capability {
        let request = self
            .vault
            .submit_request(NewRequest {
                requester: requester.clone(),
                owner: owner.clone(),
                purpose: "fixture".into(),
                scope,
                duration_secs,
            })
            .await
            .expect("fixture request is valid");
        self.vault
            .decide(request.id, owner, Verdict::Approve)
            .await
            .expect("fixture approval succeeds")
            .capability
            .expect("approval mints a capability")
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance_secs(i64::try_from(secs).unwrap_or(i64::MAX / 1000));
    }

    pub fn now(&self) -> i64 {
        self.vault.now()
    }

    /// Run a workload between `owner` and `requester`.
    ///
    /// Operations that are invalid at their point in the workload, such as
    /// revoking a capability twice, are expected to fail and are skipped.
    /// Any other failure panics.
    pub async fn run(&self, owner: &PrincipalId, requester: &PrincipalId, ops: &[VaultOp]) -> Workload {
        let mut done = Workload::default();
        for op in ops {
            match op {
                VaultOp::Seal(data) => {
                    let name = format!("file-{}", done.files.len());
                    let file = self.seal(owner, &name, data).await;
                    done.files.push(file);
                }
                VaultOp::Grant { duration_secs } => {
                    let cap = self
                        .vault
                        .grant(owner, requester.clone(), FileScope::AllFiles, *duration_secs)
                        .await
                        .expect("grant of all files is valid");
                    done.capabilities.push(cap);
                }
                VaultOp::Request { approve } => {
                    let request = self
                        .vault
                        .submit_request(NewRequest {
                            requester: requester.clone(),
                            owner: owner.clone(),
                            purpose: "workload".into(),
                            scope: FileScope::AllFiles,
                            duration_secs: DAY_SECS,
                        })
                        .await
                        .expect("request for all files is valid");
                    let verdict = if *approve {
                        Verdict::Approve
                    } else {
                        Verdict::Decline {
                            reason: "workload".into(),
                        }
                    };
                    let outcome = self
                        .vault
                        .decide(request.id, owner, verdict)
                        .await
                        .expect("pending request can be decided");
                    done.capabilities.extend(outcome.capability);
                }
                VaultOp::Revoke(i) => {
                    if let Some(cap) = nth(&done.capabilities, *i) {
                        if let Err(e) = self.vault.revoke(cap.id, owner).await {
                            assert_eq!(e.kind(), ErrorKind::InvalidState, "unexpected revoke failure: {e}");
                        }
                    }
                }
                VaultOp::Check(i) => {
                    if let (Some(cap), Some(file)) = (nth(&done.capabilities, *i), done.files.last()) {
                        self.vault
                            .check_access(cap.id, &file.id)
                            .await
                            .expect("check never fails on a healthy ledger");
                    }
                }
                VaultOp::Advance { secs } => self.advance_secs(*secs),
                VaultOp::Read => {
                    if let Some(file) = done.files.last() {
                        self.vault
                            .read_file(owner, &file.id, None)
                            .await
                            .expect("owner can always read");
                    }
                }
            }
        }
        done
    }
}

/// What a workload left behind.
#[derive(Debug, Default)]
pub struct Workload {
    pub files: Vec<SealedFile>,
    pub capabilities: Vec<Capability>,
}

fn nth<T>(items: &[T], i: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(i % items.len())
    }
}

/// Owner, requester and bystander principals for multi-party scenarios.
pub fn parties() -> (PrincipalId, PrincipalId, PrincipalId) {
    (principal("alice"), principal("doctor"), principal("mallory"))
}
