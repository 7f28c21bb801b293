//! # SealVault
//!
//! A sealed-file vault with capability-based, time-bounded access control.
//!
//! ## Overview
//!
//! - **Sealing**: files are encrypted under a per-file key, stored by the
//!   hash of their ciphertext, and recorded on the audit ledger
//! - **Capabilities**: owners grant read access to a set of files for a
//!   bounded time, and may revoke it at any point
//! - **Audit**: every state transition is a signed, hash-chained event, and
//!   the queryable index is a replay of that chain
//!
//! ## Key Concepts
//!
//! - **SealedFile**: Immutable once sealed. New content is a new file.
//! - **Capability**: Active until revoked or past its expiry. Never reactivated.
//! - **AccessRequest**: Decided exactly once by the owner.
//! - **AuditEvent**: Append-only. Tampering with one event breaks the chain from there on.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sealvault::{FileScope, NewRequest, Upload, Vault, VaultConfig, Verdict};
//! use sealvault::core::PrincipalId;
//!
//! async fn example() -> sealvault::Result<()> {
//!     let vault = Vault::in_memory(VaultConfig::default()).await?;
//!     let alice = PrincipalId::new("0xalice").unwrap();
//!     let doctor = PrincipalId::new("0xdoctor").unwrap();
//!
//!     let file = vault
//!         .seal_bytes(Upload::new(alice.clone(), "report-A.pdf", "application/pdf"), "report-A")
//!         .await?;
//!
//!     let request = vault
//!         .submit_request(NewRequest {
//!             requester: doctor.clone(),
//!             owner: alice.clone(),
//!             purpose: "follow-up".into(),
//!             scope: FileScope::files([file.id]),
//!             duration_secs: 24 * 60 * 60,
//!         })
//!         .await?;
//!     let outcome = vault.decide(request.id, &alice, Verdict::Approve).await?;
//!
//!     let capability = outcome.capability.map(|c| c.id);
//!     let plaintext = vault.read_file(&doctor, &file.id, capability).await?;
//!     assert_eq!(&plaintext[..], b"report-A");
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `sealvault::core` - Identifiers, crypto engine, audit events
//! - `sealvault::store` - Content and ledger storage, SQLite
//! - `sealvault::records` - Access records, index and policy

pub mod access;
pub mod config;
pub mod error;
pub mod keyring;
pub mod ledger;
mod locks;
pub mod pipeline;
mod retry;
pub mod vault;

// Re-export component crates
pub use sealvault_access as records;
pub use sealvault_core as core;
pub use sealvault_store as store;

pub use access::{AccessControlEngine, DecisionOutcome, NewRequest};
pub use config::{AccessConfig, LedgerConfig, SealingConfig, VaultConfig};
pub use error::{Cause, ErrorKind, Operation, Result, Stage, VaultError};
pub use keyring::{DerivedKeyring, Keyring, MasterSecret, MemoryKeyring};
pub use ledger::AuditLedger;
pub use pipeline::{PipelineState, Progress, SealingPipeline, SubmissionHandle, Upload, UploadStream};
pub use vault::{Vault, VaultParts};

pub use sealvault_access::{
    AccessDecision, AccessRequest, Capability, CapabilityStatus, Decision, DenyReason, FileScope,
    FileStatus, SealedFile, VaultStats, Verdict,
};
pub use sealvault_core::{AuditEvent, AuditKind, CapabilityId, ContentHash, PrincipalId, RequestId, SubmissionId};
