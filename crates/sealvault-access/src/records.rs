//! Domain records: sealed files, capabilities and access requests.
//!
//! Records are values. A transition never mutates a record in place; it
//! returns the record's next version, which the caller logs to the ledger
//! before anything else observes it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use sealvault_core::types::byte_vec;
use sealvault_core::{CapabilityId, ContentHash, IntegrityTag, PrincipalId, RequestId};

use crate::error::{AccessError, Result};

/// Lifecycle of a sealed file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Sealing,
    Sealed,
    Error,
}

/// An encrypted, content-addressed file and its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedFile {
    /// Hash of the stored ciphertext blob.
    pub id: ContentHash,
    pub owner: PrincipalId,
    /// Display name from the upload.
    pub name: String,
    pub mime: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Detached AEAD tag of the ciphertext.
    pub integrity_tag: IntegrityTag,
    /// File key wrapped for the owner.
    #[serde(with = "byte_vec")]
    pub key_envelope: Vec<u8>,
    pub created_at: i64,
    pub status: FileStatus,
}

/// Which files a capability covers.
///
/// The two variants are mutually exclusive and never merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "files", rename_all = "snake_case")]
pub enum FileScope {
    /// Every file of the granting owner, including files sealed later.
    AllFiles,
    /// Exactly these files.
    FileSet(BTreeSet<ContentHash>),
}

impl FileScope {
    /// A scope covering exactly the given files.
    pub fn files(hashes: impl IntoIterator<Item = ContentHash>) -> Self {
        Self::FileSet(hashes.into_iter().collect())
    }

    /// Whether a file owned by `file_owner` falls under this scope when
    /// granted by `grantor`.
    pub fn covers(&self, hash: &ContentHash, file_owner: &PrincipalId, grantor: &PrincipalId) -> bool {
        if file_owner != grantor {
            return false;
        }
        match self {
            Self::AllFiles => true,
            Self::FileSet(set) => set.contains(hash),
        }
    }
}

/// Lifecycle of a capability. `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Active,
    Revoked,
    Expired,
}

/// A time-bounded grant of read access to a set of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    /// The principal whose files this capability opens.
    pub owner: PrincipalId,
    pub grantee: PrincipalId,
    pub scope: FileScope,
    pub issued_at: i64,
    pub expires_at: i64,
    pub status: CapabilityStatus,
    /// The request this capability was minted from, if any.
    pub request: Option<RequestId>,
    /// The lapsed capability this one renews, if any.
    pub renewed_from: Option<CapabilityId>,
    /// When the capability left `Active`.
    pub ended_at: Option<i64>,
}

impl Capability {
    /// Mint a fresh active capability.
    pub fn issue(
        owner: PrincipalId,
        grantee: PrincipalId,
        scope: FileScope,
        issued_at: i64,
        duration_secs: u64,
    ) -> Self {
        let millis = i64::try_from(duration_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            id: CapabilityId::generate(),
            owner,
            grantee,
            scope,
            issued_at,
            expires_at: issued_at.saturating_add(millis),
            status: CapabilityStatus::Active,
            request: None,
            renewed_from: None,
            ended_at: None,
        }
    }

    /// Active and not yet past its expiry.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == CapabilityStatus::Active && now < self.expires_at
    }

    /// Recorded `Active` although its expiry has passed.
    pub fn is_lapsed(&self, now: i64) -> bool {
        self.status == CapabilityStatus::Active && now >= self.expires_at
    }

    /// The revoked version of this capability.
    pub fn revoked(&self, at: i64) -> Result<Self> {
        self.ensure_active("revoke")?;
        Ok(Self {
            status: CapabilityStatus::Revoked,
            ended_at: Some(at),
            ..self.clone()
        })
    }

    /// The expired version of this capability.
    pub fn expired(&self, at: i64) -> Result<Self> {
        self.ensure_active("expire")?;
        Ok(Self {
            status: CapabilityStatus::Expired,
            ended_at: Some(at),
            ..self.clone()
        })
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if self.status != CapabilityStatus::Active {
            return Err(AccessError::InvalidState(format!(
                "cannot {action} capability {} in state {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// The outcome of an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Approved { capability: CapabilityId },
    Declined { reason: String },
}

/// What the owner decides on a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Decline { reason: String },
}

/// A third party's request for access to an owner's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub requester: PrincipalId,
    pub owner: PrincipalId,
    pub purpose: String,
    pub requested_scope: FileScope,
    pub requested_duration_secs: u64,
    pub created_at: i64,
    pub decision: Decision,
    pub decided_at: Option<i64>,
}

impl AccessRequest {
    pub fn new(
        requester: PrincipalId,
        owner: PrincipalId,
        purpose: String,
        requested_scope: FileScope,
        requested_duration_secs: u64,
        created_at: i64,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            requester,
            owner,
            purpose,
            requested_scope,
            requested_duration_secs,
            created_at,
            decision: Decision::Pending,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision == Decision::Pending
    }

    /// The approved version of this request.
    pub fn approved(&self, capability: CapabilityId, at: i64) -> Result<Self> {
        self.ensure_pending()?;
        Ok(Self {
            decision: Decision::Approved { capability },
            decided_at: Some(at),
            ..self.clone()
        })
    }

    /// The declined version of this request.
    pub fn declined(&self, reason: String, at: i64) -> Result<Self> {
        self.ensure_pending()?;
        Ok(Self {
            decision: Decision::Declined { reason },
            decided_at: Some(at),
            ..self.clone()
        })
    }

    fn ensure_pending(&self) -> Result<()> {
        if !self.is_pending() {
            return Err(AccessError::InvalidState(format!(
                "request {} is already decided",
                self.id
            )));
        }
        Ok(())
    }
}
