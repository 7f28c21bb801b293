//! The queryable vault index.
//!
//! The index is a projection of the audit ledger: it is built by applying
//! events in seq order, and a vault rebuilds it on start by replaying the
//! chain from genesis.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sealvault_core::{AuditEvent, CapabilityId, ContentHash, PrincipalId, RequestId};

use crate::error::{AccessError, Result};
use crate::payload::EventDetail;
use crate::records::{AccessRequest, Capability, CapabilityStatus, SealedFile};

/// Dashboard counts for one owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub files: u64,
    /// Plaintext bytes across the owner's files.
    pub total_bytes: u64,
    pub active_capabilities: u64,
    /// Recorded `Expired`, or still `Active` past expiry.
    pub expired_capabilities: u64,
    pub revoked_capabilities: u64,
    pub pending_requests: u64,
    /// `FileAccessed` events on the owner's files.
    pub accesses: u64,
}

/// In-memory projection of every record in the ledger.
#[derive(Debug, Default)]
pub struct VaultIndex {
    next_seq: u64,

    files: HashMap<ContentHash, SealedFile>,
    capabilities: HashMap<CapabilityId, Capability>,
    requests: HashMap<RequestId, AccessRequest>,

    // Secondary indexes, in first-seen order.
    files_by_owner: HashMap<PrincipalId, Vec<ContentHash>>,
    caps_by_owner: HashMap<PrincipalId, Vec<CapabilityId>>,
    caps_by_grantee: HashMap<PrincipalId, Vec<CapabilityId>>,
    requests_by_owner: HashMap<PrincipalId, Vec<RequestId>>,

    accesses_by_owner: HashMap<PrincipalId, u64>,
}

impl VaultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a complete run of events starting at seq 0.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a AuditEvent>) -> Result<Self> {
        let mut index = Self::new();
        for event in events {
            index.apply_event(event)?;
        }
        Ok(index)
    }

    /// Seq of the next event this index expects.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Apply one event. Events must arrive in seq order without gaps.
    pub fn apply_event(&mut self, event: &AuditEvent) -> Result<()> {
        if event.seq != self.next_seq {
            return Err(AccessError::OutOfOrder {
                expected: self.next_seq,
                got: event.seq,
            });
        }

        match EventDetail::decode(event.kind, &event.detail)? {
            EventDetail::File(file) => self.upsert_file(file),
            EventDetail::Request(request) => self.upsert_request(request),
            EventDetail::Capability(cap) => self.upsert_capability(cap),
            EventDetail::Accessed(accessed) => {
                if let Some(file) = self.files.get(&accessed.file) {
                    *self.accesses_by_owner.entry(file.owner.clone()).or_default() += 1;
                }
            }
        }

        tracing::trace!(seq = event.seq, kind = event.kind.name(), "applied event");
        self.next_seq += 1;
        Ok(())
    }

    fn upsert_file(&mut self, file: SealedFile) {
        if !self.files.contains_key(&file.id) {
            self.files_by_owner
                .entry(file.owner.clone())
                .or_default()
                .push(file.id);
        }
        self.files.insert(file.id, file);
    }

    fn upsert_request(&mut self, request: AccessRequest) {
        if !self.requests.contains_key(&request.id) {
            self.requests_by_owner
                .entry(request.owner.clone())
                .or_default()
                .push(request.id);
        }
        self.requests.insert(request.id, request);
    }

    fn upsert_capability(&mut self, cap: Capability) {
        if !self.capabilities.contains_key(&cap.id) {
            self.caps_by_owner
                .entry(cap.owner.clone())
                .or_default()
                .push(cap.id);
            self.caps_by_grantee
                .entry(cap.grantee.clone())
                .or_default()
                .push(cap.id);
        }
        self.capabilities.insert(cap.id, cap);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn file(&self, hash: &ContentHash) -> Option<&SealedFile> {
        self.files.get(hash)
    }

    pub fn files_of(&self, owner: &PrincipalId) -> Vec<&SealedFile> {
        collect(&self.files_by_owner, &self.files, owner)
    }

    pub fn capability(&self, id: &CapabilityId) -> Option<&Capability> {
        self.capabilities.get(id)
    }

    /// Capabilities granted by `owner`.
    pub fn capabilities_of(&self, owner: &PrincipalId) -> Vec<&Capability> {
        collect(&self.caps_by_owner, &self.capabilities, owner)
    }

    /// Capabilities whose grantee is `grantee`.
    pub fn capabilities_held_by(&self, grantee: &PrincipalId) -> Vec<&Capability> {
        collect(&self.caps_by_grantee, &self.capabilities, grantee)
    }

    pub fn request(&self, id: &RequestId) -> Option<&AccessRequest> {
        self.requests.get(id)
    }

    /// Requests addressed to `owner`, optionally only the undecided ones.
    pub fn requests_for(&self, owner: &PrincipalId, pending_only: bool) -> Vec<&AccessRequest> {
        collect(&self.requests_by_owner, &self.requests, owner)
            .into_iter()
            .filter(|r| !pending_only || r.is_pending())
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn stats(&self, owner: &PrincipalId, now: i64) -> VaultStats {
        let mut stats = VaultStats::default();

        for file in self.files_of(owner) {
            stats.files += 1;
            stats.total_bytes += file.size;
        }

        for cap in self.capabilities_of(owner) {
            match cap.status {
                CapabilityStatus::Active if cap.is_live(now) => stats.active_capabilities += 1,
                CapabilityStatus::Active | CapabilityStatus::Expired => {
                    stats.expired_capabilities += 1
                }
                CapabilityStatus::Revoked => stats.revoked_capabilities += 1,
            }
        }

        stats.pending_requests = self.requests_for(owner, true).len() as u64;
        stats.accesses = self.accesses_by_owner.get(owner).copied().unwrap_or(0);
        stats
    }
}

fn collect<'a, K, V>(
    by: &HashMap<PrincipalId, Vec<K>>,
    records: &'a HashMap<K, V>,
    principal: &PrincipalId,
) -> Vec<&'a V>
where
    K: std::hash::Hash + Eq,
{
    by.get(principal)
        .map(|ids| ids.iter().filter_map(|id| records.get(id)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{encode_detail, FileAccessedPayload};
    use crate::records::{FileScope, FileStatus};
    use sealvault_core::{AuditKind, ChainHash, EventDraft, IntegrityTag, LedgerKeypair, Subject};

    struct Chain {
        keys: LedgerKeypair,
        events: Vec<AuditEvent>,
    }

    impl Chain {
        fn new() -> Self {
            Self {
                keys: LedgerKeypair::generate(),
                events: Vec::new(),
            }
        }

        fn push(&mut self, kind: AuditKind, subject: Subject, detail: Vec<u8>, at: i64) {
            let actor = PrincipalId::new("0xowner").unwrap();
            let prior = self.events.last().map_or(ChainHash::ZERO, |e| e.this_hash);
            let seq = self.events.len() as u64;
            let draft = EventDraft::new(kind, actor, subject, at, detail);
            self.events.push(AuditEvent::seal(draft, seq, prior, &self.keys));
        }
    }

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn file(byte: u8) -> SealedFile {
        SealedFile {
            id: ContentHash::from_bytes([byte; 32]),
            owner: p("0xowner"),
            name: format!("file-{byte}"),
            mime: "text/plain".into(),
            size: 10,
            integrity_tag: IntegrityTag([0; 16]),
            key_envelope: vec![],
            created_at: 0,
            status: FileStatus::Sealed,
        }
    }

    fn scenario() -> (Chain, Capability, AccessRequest) {
        let mut chain = Chain::new();
        let f = file(1);
        chain.push(
            AuditKind::FileSealed,
            Subject::File(f.id),
            encode_detail(&f).unwrap(),
            1,
        );

        let request = AccessRequest::new(
            p("0xdoctor"),
            p("0xowner"),
            "consult".into(),
            FileScope::files([f.id]),
            60,
            2,
        );
        chain.push(
            AuditKind::RequestSubmitted,
            Subject::Request(request.id),
            encode_detail(&request).unwrap(),
            2,
        );

        let mut cap = Capability::issue(p("0xowner"), p("0xdoctor"), request.requested_scope.clone(), 3, 60);
        cap.request = Some(request.id);
        let approved = request.approved(cap.id, 3).unwrap();
        chain.push(
            AuditKind::RequestApproved,
            Subject::Request(approved.id),
            encode_detail(&approved).unwrap(),
            3,
        );
        chain.push(
            AuditKind::CapabilityIssued,
            Subject::Capability(cap.id),
            encode_detail(&cap).unwrap(),
            3,
        );
        (chain, cap, approved)
    }

    #[test]
    fn test_replay_builds_records() {
        let (chain, cap, request) = scenario();
        let index = VaultIndex::from_events(&chain.events).unwrap();

        assert_eq!(index.next_seq(), 4);
        assert_eq!(index.files_of(&p("0xowner")).len(), 1);
        assert_eq!(index.capability(&cap.id), Some(&cap));
        assert_eq!(index.request(&request.id), Some(&request));
        assert!(index.requests_for(&p("0xowner"), true).is_empty());
        assert_eq!(index.requests_for(&p("0xowner"), false).len(), 1);
        assert_eq!(index.capabilities_held_by(&p("0xdoctor")).len(), 1);
        assert!(index.capabilities_held_by(&p("0xowner")).is_empty());
    }

    #[test]
    fn test_later_event_overwrites_snapshot() {
        let (mut chain, cap, _) = scenario();
        let revoked = cap.revoked(10).unwrap();
        chain.push(
            AuditKind::CapabilityRevoked,
            Subject::Capability(cap.id),
            encode_detail(&revoked).unwrap(),
            10,
        );
        let index = VaultIndex::from_events(&chain.events).unwrap();
        assert_eq!(
            index.capability(&cap.id).map(|c| c.status),
            Some(CapabilityStatus::Revoked)
        );
        assert_eq!(index.capabilities_of(&p("0xowner")).len(), 1);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let (chain, _, _) = scenario();
        let mut index = VaultIndex::new();
        let err = index.apply_event(&chain.events[1]).unwrap_err();
        assert_eq!(err, AccessError::OutOfOrder { expected: 0, got: 1 });
    }

    #[test]
    fn test_stats() {
        let (mut chain, cap, _) = scenario();
        let accessed = FileAccessedPayload {
            file: ContentHash::from_bytes([1; 32]),
            reader: p("0xdoctor"),
            capability: Some(cap.id),
        };
        chain.push(
            AuditKind::FileAccessed,
            Subject::File(accessed.file),
            encode_detail(&accessed).unwrap(),
            5,
        );
        let index = VaultIndex::from_events(&chain.events).unwrap();

        let live = index.stats(&p("0xowner"), 10);
        assert_eq!(live.files, 1);
        assert_eq!(live.total_bytes, 10);
        assert_eq!(live.active_capabilities, 1);
        assert_eq!(live.accesses, 1);
        assert_eq!(live.pending_requests, 0);

        let later = index.stats(&p("0xowner"), cap.expires_at);
        assert_eq!(later.active_capabilities, 0);
        assert_eq!(later.expired_capabilities, 1);

        assert_eq!(index.stats(&p("0xnobody"), 0), VaultStats::default());
    }
}
