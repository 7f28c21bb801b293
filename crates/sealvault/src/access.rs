//! The access control engine.
//!
//! Owns every transition of [`AccessRequest`] and [`Capability`] records and
//! the decrypting read path. Each transition is written to the
//! [`AuditLedger`] before it is visible anywhere else; a failed append means
//! the transition did not happen.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sealvault_access::{
    check_capability, encode_detail, needs_expiry, validate_duration, validate_scope,
    AccessDecision, AccessError, AccessRequest, Capability, CapabilityStatus, DenyReason,
    FileAccessedPayload, FileScope, SealedFile, Verdict,
};
use sealvault_core::{
    decrypt, hash_content, unwrap_key, AuditKind, CapabilityId, Ciphertext, Clock, ContentHash,
    CryptoError, EventDraft, KeyEnvelope, PrincipalId, RequestId, Subject,
};
use sealvault_store::ContentStore;

use crate::config::{AccessConfig, SealingConfig};
use crate::error::{Cause, Operation, OperationExt, Result, VaultError};
use crate::keyring::Keyring;
use crate::ledger::AuditLedger;
use crate::locks::KeyedLocks;
use crate::retry::{retry, RetryPolicy};

/// Result of deciding an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub request: AccessRequest,
    /// The capability minted on approval.
    pub capability: Option<Capability>,
}

/// Parameters of a new access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub requester: PrincipalId,
    pub owner: PrincipalId,
    pub purpose: String,
    pub scope: FileScope,
    pub duration_secs: u64,
}

pub struct AccessControlEngine {
    ledger: Arc<AuditLedger>,
    content: Arc<dyn ContentStore>,
    keyring: Arc<dyn Keyring>,
    clock: Arc<dyn Clock>,
    config: AccessConfig,
    store_policy: RetryPolicy,
    capability_locks: KeyedLocks<CapabilityId>,
    request_locks: KeyedLocks<RequestId>,
}

impl AccessControlEngine {
    pub fn new(
        ledger: Arc<AuditLedger>,
        content: Arc<dyn ContentStore>,
        keyring: Arc<dyn Keyring>,
        clock: Arc<dyn Clock>,
        config: AccessConfig,
        sealing: &SealingConfig,
    ) -> Self {
        Self {
            ledger,
            content,
            keyring,
            clock,
            config,
            store_policy: RetryPolicy::from(sealing),
            capability_locks: KeyedLocks::new(),
            request_locks: KeyedLocks::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a pending request for access to `owner`'s files.
    pub async fn submit_request(&self, new: NewRequest) -> Result<AccessRequest> {
        let op = Operation::SubmitRequest;
        if new.requester == new.owner {
            return Err(VaultError::new(
                op,
                Cause::InvalidInput("an owner cannot request access to their own files".into()),
            ));
        }
        self.validate_grant(&new.scope, &new.owner, new.duration_secs).during(op)?;

        let request = AccessRequest::new(
            new.requester,
            new.owner,
            new.purpose,
            new.scope,
            new.duration_secs,
            self.clock.now_millis(),
        );
        let draft = draft_for(
            AuditKind::RequestSubmitted,
            request.requester.clone(),
            Subject::Request(request.id),
            request.created_at,
            &request,
        )
        .during(op)?;
        self.ledger.append(draft).await.during(op)?;

        tracing::info!(request = %request.id, requester = %request.requester, owner = %request.owner, "access request submitted");
        Ok(request)
    }

    /// Approve or decline a pending request. Only its owner may decide.
    ///
    /// Approval records the decision and the minted capability in one batch.
    pub async fn decide(&self, id: RequestId, owner: &PrincipalId, verdict: Verdict) -> Result<DecisionOutcome> {
        let op = Operation::Decide;
        let _guard = self.request_locks.lock(id).await;

        let request = self
            .ledger
            .with_index(|ix| ix.request(&id).cloned())
            .ok_or(AccessError::UnknownRequest(id))
            .during(op)?;
        ensure_owner(&request.owner, owner).during(op)?;

        let now = self.clock.now_millis();
        match verdict {
            Verdict::Approve => {
                let mut cap = Capability::issue(
                    request.owner.clone(),
                    request.requester.clone(),
                    request.requested_scope.clone(),
                    now,
                    request.requested_duration_secs,
                );
                cap.request = Some(request.id);
                let decided = request.approved(cap.id, now).during(op)?;

                let drafts = vec![
                    draft_for(AuditKind::RequestApproved, owner.clone(), Subject::Request(id), now, &decided)
                        .during(op)?,
                    draft_for(AuditKind::CapabilityIssued, owner.clone(), Subject::Capability(cap.id), now, &cap)
                        .during(op)?,
                ];
                self.ledger.append_all(drafts).await.during(op)?;

                tracing::info!(request = %id, capability = %cap.id, grantee = %cap.grantee, "request approved");
                Ok(DecisionOutcome {
                    request: decided,
                    capability: Some(cap),
                })
            }
            Verdict::Decline { reason } => {
                let decided = request.declined(reason, now).during(op)?;
                let draft = draft_for(AuditKind::RequestDeclined, owner.clone(), Subject::Request(id), now, &decided)
                    .during(op)?;
                self.ledger.append(draft).await.during(op)?;

                tracing::info!(request = %id, "request declined");
                Ok(DecisionOutcome {
                    request: decided,
                    capability: None,
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capabilities
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a capability directly, without a request.
    pub async fn grant(
        &self,
        owner: &PrincipalId,
        grantee: PrincipalId,
        scope: FileScope,
        duration_secs: u64,
    ) -> Result<Capability> {
        let op = Operation::Grant;
        if &grantee == owner {
            return Err(VaultError::new(
                op,
                Cause::InvalidInput("an owner cannot grant access to themselves".into()),
            ));
        }
        self.validate_grant(&scope, owner, duration_secs).during(op)?;

        let cap = Capability::issue(owner.clone(), grantee, scope, self.clock.now_millis(), duration_secs);
        let draft = draft_for(
            AuditKind::CapabilityIssued,
            owner.clone(),
            Subject::Capability(cap.id),
            cap.issued_at,
            &cap,
        )
        .during(op)?;
        self.ledger.append(draft).await.during(op)?;

        tracing::info!(capability = %cap.id, grantee = %cap.grantee, expires_at = cap.expires_at, "capability granted");
        Ok(cap)
    }

    /// Revoke an active capability. Irreversible.
    pub async fn revoke(&self, id: CapabilityId, owner: &PrincipalId) -> Result<Capability> {
        let op = Operation::Revoke;
        let _guard = self.capability_locks.lock(id).await;

        let cap = self.owned_capability(&id, owner).during(op)?;
        let now = self.clock.now_millis();

        if needs_expiry(&cap, now) {
            self.record_expiry(&cap, now).await.during(op)?;
            return Err(VaultError::new(
                op,
                Cause::InvalidState(format!("capability {id} has expired")),
            ));
        }

        let revoked = cap.revoked(now).during(op)?;
        let draft = draft_for(AuditKind::CapabilityRevoked, owner.clone(), Subject::Capability(id), now, &revoked)
            .during(op)?;
        self.ledger.append(draft).await.during(op)?;

        tracing::info!(capability = %id, "capability revoked");
        Ok(revoked)
    }

    /// Replace an expired or revoked capability with a fresh one for the
    /// same grantee and scope.
    pub async fn renew(&self, id: CapabilityId, owner: &PrincipalId, duration_secs: u64) -> Result<Capability> {
        let op = Operation::Renew;
        let _guard = self.capability_locks.lock(id).await;

        let old = self.owned_capability(&id, owner).during(op)?;
        self.validate_grant(&old.scope, owner, duration_secs).during(op)?;

        let now = self.clock.now_millis();
        let mut drafts = Vec::with_capacity(2);
        if needs_expiry(&old, now) {
            let expired = old.expired(now).during(op)?;
            drafts.push(
                draft_for(AuditKind::CapabilityExpired, PrincipalId::system(), Subject::Capability(id), now, &expired)
                    .during(op)?,
            );
        } else if old.status == CapabilityStatus::Active {
            return Err(VaultError::new(
                op,
                Cause::InvalidState(format!("capability {id} is still active")),
            ));
        }

        let mut fresh = Capability::issue(owner.clone(), old.grantee.clone(), old.scope.clone(), now, duration_secs);
        fresh.renewed_from = Some(old.id);
        drafts.push(
            draft_for(AuditKind::CapabilityIssued, owner.clone(), Subject::Capability(fresh.id), now, &fresh)
                .during(op)?,
        );
        self.ledger.append_all(drafts).await.during(op)?;

        tracing::info!(capability = %fresh.id, renewed_from = %id, "capability renewed");
        Ok(fresh)
    }

    /// Decide whether `id` opens `hash` at `now`.
    ///
    /// The first check at or after a capability's expiry records it as
    /// `Expired`.
    pub async fn check_access(&self, id: CapabilityId, hash: &ContentHash, now: i64) -> Result<AccessDecision> {
        let _guard = self.capability_locks.lock(id).await;
        self.evaluate(id, hash, None, now).await.during(Operation::CheckAccess)
    }

    /// Evaluate `id` against `hash`. The caller holds the capability lock,
    /// so the record read here stays current until the lock is released.
    async fn evaluate(
        &self,
        id: CapabilityId,
        hash: &ContentHash,
        holder: Option<&PrincipalId>,
        now: i64,
    ) -> std::result::Result<AccessDecision, Cause> {
        let (cap, file) = self.ledger.with_index(|ix| (ix.capability(&id).cloned(), ix.file(hash).cloned()));
        let Some(cap) = cap else {
            return Ok(AccessDecision::Denied(DenyReason::UnknownCapability));
        };

        if needs_expiry(&cap, now) {
            self.record_expiry(&cap, now).await?;
            return Ok(AccessDecision::Denied(DenyReason::Expired));
        }

        Ok(check_capability(Some(&cap), hash, file.as_ref(), holder, now))
    }

    async fn record_expiry(&self, cap: &Capability, now: i64) -> std::result::Result<(), Cause> {
        let expired = cap.expired(now)?;
        let draft = draft_for(
            AuditKind::CapabilityExpired,
            PrincipalId::system(),
            Subject::Capability(cap.id),
            now,
            &expired,
        )?;
        self.ledger.append(draft).await?;
        tracing::info!(capability = %cap.id, expires_at = cap.expires_at, "capability expired");
        Ok(())
    }

    fn owned_capability(&self, id: &CapabilityId, owner: &PrincipalId) -> std::result::Result<Capability, AccessError> {
        let cap = self
            .ledger
            .with_index(|ix| ix.capability(id).cloned())
            .ok_or(AccessError::UnknownCapability(*id))?;
        ensure_owner(&cap.owner, owner)?;
        Ok(cap)
    }

    fn validate_grant(&self, scope: &FileScope, owner: &PrincipalId, duration_secs: u64) -> sealvault_access::Result<()> {
        validate_duration(duration_secs, self.config.max_grant_duration_secs)?;
        self.ledger
            .with_index(|ix| validate_scope(scope, owner, |hash| ix.file(hash)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Decrypt a sealed file for `principal`.
    ///
    /// The owner reads directly. Anyone else must present a capability
    /// issued to them that covers the file. The access is on the ledger
    /// before any plaintext is returned.
    pub async fn read_file(
        &self,
        principal: &PrincipalId,
        hash: &ContentHash,
        capability: Option<CapabilityId>,
        now: i64,
    ) -> Result<Bytes> {
        let op = Operation::ReadFile;
        let file = self
            .ledger
            .with_index(|ix| ix.file(hash).cloned())
            .ok_or(AccessError::UnknownFile(*hash))
            .during(op)?;

        // Held until the access is on the ledger, so a revoke either lands
        // before the check or after the recorded read.
        let _guard = match capability {
            Some(id) if principal != &file.owner => Some(self.capability_locks.lock(id).await),
            _ => None,
        };
        let used = if principal == &file.owner {
            None
        } else {
            let decision = match capability {
                Some(id) => self.evaluate(id, hash, Some(principal), now).await.during(op)?,
                None => AccessDecision::Denied(DenyReason::UnknownCapability),
            };
            if let AccessDecision::Denied(reason) = decision {
                tracing::warn!(file = %hash, reader = %principal, %reason, "read denied");
                return Err(VaultError::new(op, Cause::Denied(reason)));
            }
            capability
        };

        let plaintext = self.open_file(&file).await.during(op)?;

        let payload = FileAccessedPayload {
            file: *hash,
            reader: principal.clone(),
            capability: used,
        };
        let draft = draft_for(AuditKind::FileAccessed, principal.clone(), Subject::File(*hash), now, &payload)
            .during(op)?;
        self.ledger.append(draft).await.during(op)?;

        tracing::info!(file = %hash, reader = %principal, "file read");
        Ok(plaintext)
    }

    async fn open_file(&self, file: &SealedFile) -> std::result::Result<Bytes, Cause> {
        let blob = retry(&self.store_policy, "get", || self.content.get(&file.id))
            .await?
            .ok_or_else(|| Cause::Internal(format!("ciphertext for sealed file {} is missing", file.id)))?;

        let secret = self.keyring.secret(&file.owner);
        let file = file.clone();
        let work = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, CryptoError> {
            if hash_content(&blob) != file.id {
                return Err(CryptoError::IntegrityViolation);
            }
            let ciphertext = Ciphertext::from_blob(&blob)?;
            let envelope = KeyEnvelope::from_bytes(&file.key_envelope)?;
            let key = unwrap_key(&envelope, &secret, &file.id)?;
            decrypt(&ciphertext, &key, &file.integrity_tag)
        });

        match work.await {
            Ok(result) => Ok(Bytes::from(result?)),
            Err(e) => Err(Cause::Internal(e.to_string())),
        }
    }
}

fn ensure_owner(owner: &PrincipalId, caller: &PrincipalId) -> std::result::Result<(), AccessError> {
    if owner != caller {
        return Err(AccessError::NotOwner {
            principal: caller.clone(),
        });
    }
    Ok(())
}

fn draft_for<T: Serialize>(
    kind: AuditKind,
    actor: PrincipalId,
    subject: Subject,
    timestamp: i64,
    record: &T,
) -> std::result::Result<EventDraft, AccessError> {
    Ok(EventDraft::new(kind, actor, subject, timestamp, encode_detail(record)?))
}
