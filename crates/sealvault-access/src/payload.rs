//! CBOR event details.
//!
//! Each audit event carries the post-transition record of its subject, so
//! the index can be rebuilt from the ledger alone.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sealvault_core::{AuditKind, CapabilityId, ContentHash, PrincipalId};

use crate::error::{AccessError, Result};
use crate::records::{AccessRequest, Capability, SealedFile};

/// Serialize a record to CBOR.
pub fn encode_detail<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| AccessError::Detail(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a record from CBOR.
pub fn decode_detail<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| AccessError::Detail(e.to_string()))
}

/// Detail of a `FileAccessed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccessedPayload {
    pub file: ContentHash,
    pub reader: PrincipalId,
    /// Absent when the owner reads their own file.
    pub capability: Option<CapabilityId>,
}

/// A decoded event detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDetail {
    File(SealedFile),
    Request(AccessRequest),
    Capability(Capability),
    Accessed(FileAccessedPayload),
}

impl EventDetail {
    /// Decode the detail that belongs to `kind`.
    pub fn decode(kind: AuditKind, bytes: &[u8]) -> Result<Self> {
        Ok(match kind {
            AuditKind::FileSealed => Self::File(decode_detail(bytes)?),
            AuditKind::RequestSubmitted
            | AuditKind::RequestApproved
            | AuditKind::RequestDeclined => Self::Request(decode_detail(bytes)?),
            AuditKind::CapabilityIssued
            | AuditKind::CapabilityRevoked
            | AuditKind::CapabilityExpired => Self::Capability(decode_detail(bytes)?),
            AuditKind::FileAccessed => Self::Accessed(decode_detail(bytes)?),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::File(f) => encode_detail(f),
            Self::Request(r) => encode_detail(r),
            Self::Capability(c) => encode_detail(c),
            Self::Accessed(a) => encode_detail(a),
        }
    }
}
