//! Audit events: the links of the tamper-evident hash chain.
//!
//! Every state transition in the vault produces exactly one [`AuditEvent`].
//! Each event's hash covers the previous event's hash, so altering any byte
//! of any event breaks every link after it.

use serde::{Deserialize, Serialize};

use crate::canonical::event_hash;
use crate::error::CoreError;
use crate::signing::{EventSignature, LedgerKeypair, LedgerPublicKey};
use crate::types::{byte_vec, CapabilityId, ChainHash, ContentHash, PrincipalId, RequestId};

/// The kind of state transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum AuditKind {
    FileSealed = 1,
    RequestSubmitted = 2,
    RequestApproved = 3,
    RequestDeclined = 4,
    CapabilityIssued = 5,
    CapabilityRevoked = 6,
    CapabilityExpired = 7,
    FileAccessed = 8,
}

impl AuditKind {
    /// Convert to the wire code.
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse from the wire code.
    pub fn from_u16(code: u16) -> Result<Self, CoreError> {
        Ok(match code {
            1 => Self::FileSealed,
            2 => Self::RequestSubmitted,
            3 => Self::RequestApproved,
            4 => Self::RequestDeclined,
            5 => Self::CapabilityIssued,
            6 => Self::CapabilityRevoked,
            7 => Self::CapabilityExpired,
            8 => Self::FileAccessed,
            other => return Err(CoreError::UnknownKind(other)),
        })
    }

    /// Stable lowercase name, as used in logs and JSON.
    pub const fn name(self) -> &'static str {
        match self {
            Self::FileSealed => "file_sealed",
            Self::RequestSubmitted => "request_submitted",
            Self::RequestApproved => "request_approved",
            Self::RequestDeclined => "request_declined",
            Self::CapabilityIssued => "capability_issued",
            Self::CapabilityRevoked => "capability_revoked",
            Self::CapabilityExpired => "capability_expired",
            Self::FileAccessed => "file_accessed",
        }
    }
}

/// The entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    File(ContentHash),
    Request(RequestId),
    Capability(CapabilityId),
}

impl Subject {
    /// Wire code of the subject type.
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::File(_) => 0,
            Self::Request(_) => 1,
            Self::Capability(_) => 2,
        }
    }

    /// The subject's identifier bytes.
    pub fn id_bytes(&self) -> &[u8; 32] {
        match self {
            Self::File(h) => h.as_bytes(),
            Self::Request(r) => r.as_bytes(),
            Self::Capability(c) => c.as_bytes(),
        }
    }

    /// Rebuild from wire code and identifier bytes.
    pub fn from_parts(type_code: u8, id: [u8; 32]) -> Result<Self, CoreError> {
        match type_code {
            0 => Ok(Self::File(ContentHash(id))),
            1 => Ok(Self::Request(RequestId(id))),
            2 => Ok(Self::Capability(CapabilityId(id))),
            other => Err(CoreError::DecodingError(format!(
                "unknown subject type {other}"
            ))),
        }
    }
}

/// An event that has not yet been placed on the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub kind: AuditKind,
    pub actor: PrincipalId,
    pub subject: Subject,
    pub timestamp: i64,
    /// Canonical CBOR of the domain record this transition produced.
    pub detail: Vec<u8>,
}

impl EventDraft {
    pub fn new(
        kind: AuditKind,
        actor: PrincipalId,
        subject: Subject,
        timestamp: i64,
        detail: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            actor,
            subject,
            timestamp,
            detail,
        }
    }
}

/// One link of the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the chain. Starts at 0, no gaps.
    pub seq: u64,
    pub kind: AuditKind,
    pub actor: PrincipalId,
    pub subject: Subject,
    pub timestamp: i64,
    #[serde(with = "byte_vec")]
    pub detail: Vec<u8>,
    /// `this_hash` of event `seq - 1`, or zero for the genesis event.
    pub prior_hash: ChainHash,
    pub this_hash: ChainHash,
    /// Ledger key signature over `this_hash`.
    pub signature: EventSignature,
}

impl AuditEvent {
    /// Place a draft on the chain after `prior_hash`, hashing and signing it.
    pub fn seal(
        draft: EventDraft,
        seq: u64,
        prior_hash: ChainHash,
        keypair: &LedgerKeypair,
    ) -> Self {
        let this_hash = event_hash(seq, &prior_hash, &draft);
        let signature = keypair.sign_event(&this_hash);
        Self {
            seq,
            kind: draft.kind,
            actor: draft.actor,
            subject: draft.subject,
            timestamp: draft.timestamp,
            detail: draft.detail,
            prior_hash,
            this_hash,
            signature,
        }
    }

    /// The draft this event was sealed from.
    pub fn to_draft(&self) -> EventDraft {
        EventDraft {
            kind: self.kind,
            actor: self.actor.clone(),
            subject: self.subject,
            timestamp: self.timestamp,
            detail: self.detail.clone(),
        }
    }

    /// Recompute this event's hash from its contents.
    pub fn compute_hash(&self) -> ChainHash {
        event_hash(self.seq, &self.prior_hash, &self.to_draft())
    }

    /// Whether `this_hash` matches the event's contents.
    pub fn hash_is_valid(&self) -> bool {
        self.compute_hash() == self.this_hash
    }

    /// Verify the ledger signature over `this_hash`.
    pub fn verify_signature(&self, ledger_key: &LedgerPublicKey) -> Result<(), CoreError> {
        ledger_key.verify_event(&self.this_hash, &self.signature)
    }
}

/// Find the first broken link in a contiguous run of events.
///
/// `prior_hash` is the hash the first event must link to: zero at genesis,
/// otherwise the `this_hash` of the event before the run. Returns the `seq`
/// of the first event whose position, link, hash or signature is wrong.
pub fn find_chain_break(
    prior_hash: &ChainHash,
    start_seq: u64,
    events: &[AuditEvent],
    ledger_key: &LedgerPublicKey,
) -> Option<u64> {
    let mut expected_prior = *prior_hash;
    for (offset, event) in events.iter().enumerate() {
        let expected_seq = start_seq + offset as u64;
        if event.seq != expected_seq
            || event.prior_hash != expected_prior
            || !event.hash_is_valid()
            || event.verify_signature(ledger_key).is_err()
        {
            return Some(expected_seq);
        }
        expected_prior = event.this_hash;
    }
    None
}
