//! Pure access decisions.
//!
//! Nothing here touches the ledger. Whether a lapsed capability must be
//! recorded as `Expired` is reported to the caller, which logs it.

use serde::{Deserialize, Serialize};

use sealvault_core::{ContentHash, PrincipalId};

use crate::error::{AccessError, Result};
use crate::records::{Capability, CapabilityStatus, FileScope, SealedFile};

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    UnknownCapability,
    Revoked,
    Expired,
    OutOfScope,
    WrongHolder,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCapability => "unknown_capability",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::OutOfScope => "out_of_scope",
            Self::WrongHolder => "wrong_holder",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating a capability against a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    Authorized,
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Evaluate a capability for `hash` at `now`.
///
/// `file` is the sealed record for `hash`, if one exists; an unknown file is
/// never in scope. `holder` is checked against the grantee when given.
pub fn check_capability(
    capability: Option<&Capability>,
    hash: &ContentHash,
    file: Option<&SealedFile>,
    holder: Option<&PrincipalId>,
    now: i64,
) -> AccessDecision {
    let Some(cap) = capability else {
        return AccessDecision::Denied(DenyReason::UnknownCapability);
    };

    match cap.status {
        CapabilityStatus::Revoked => return AccessDecision::Denied(DenyReason::Revoked),
        CapabilityStatus::Expired => return AccessDecision::Denied(DenyReason::Expired),
        CapabilityStatus::Active => {}
    }
    if now >= cap.expires_at {
        return AccessDecision::Denied(DenyReason::Expired);
    }

    if let Some(holder) = holder {
        if holder != &cap.grantee {
            return AccessDecision::Denied(DenyReason::WrongHolder);
        }
    }

    match file {
        Some(file) if cap.scope.covers(hash, &file.owner, &cap.owner) => AccessDecision::Authorized,
        _ => AccessDecision::Denied(DenyReason::OutOfScope),
    }
}

/// Whether `cap` is still recorded `Active` past its expiry.
pub fn needs_expiry(cap: &Capability, now: i64) -> bool {
    cap.is_lapsed(now)
}

/// Check a requested duration against the configured maximum.
pub fn validate_duration(duration_secs: u64, max_secs: u64) -> Result<()> {
    if duration_secs == 0 {
        return Err(AccessError::InvalidInput("duration must be positive".into()));
    }
    if duration_secs > max_secs {
        return Err(AccessError::InvalidInput(format!(
            "duration {duration_secs}s exceeds the maximum of {max_secs}s"
        )));
    }
    Ok(())
}

/// Check that a scope only names files sealed by `owner`.
///
/// `lookup` resolves a hash to its sealed record.
pub fn validate_scope<'a, F>(scope: &FileScope, owner: &PrincipalId, lookup: F) -> Result<()>
where
    F: Fn(&ContentHash) -> Option<&'a SealedFile>,
{
    let FileScope::FileSet(files) = scope else {
        return Ok(());
    };
    if files.is_empty() {
        return Err(AccessError::InvalidInput("file set is empty".into()));
    }
    for hash in files {
        match lookup(hash) {
            Some(file) if &file.owner == owner => {}
            Some(_) => {
                return Err(AccessError::InvalidInput(format!(
                    "file {hash} is not owned by {owner}"
                )))
            }
            None => return Err(AccessError::InvalidInput(format!("file {hash} is not sealed"))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use sealvault_core::IntegrityTag;

    use super::*;
    use crate::records::FileStatus;

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn sealed(id: ContentHash, owner: &str) -> SealedFile {
        SealedFile {
            id,
            owner: p(owner),
            name: "report.pdf".into(),
            mime: "application/pdf".into(),
            size: 3,
            integrity_tag: IntegrityTag([0; 16]),
            key_envelope: vec![1, 2, 3],
            created_at: 0,
            status: FileStatus::Sealed,
        }
    }

    fn cap(scope: FileScope) -> Capability {
        Capability::issue(p("0xowner"), p("0xdoctor"), scope, 0, 100)
    }

    #[test]
    fn test_authorized_in_scope() {
        let h1 = ContentHash::from_bytes([1; 32]);
        let f1 = sealed(h1, "0xowner");
        let c = cap(FileScope::files([h1]));
        assert_eq!(
            check_capability(Some(&c), &h1, Some(&f1), Some(&p("0xdoctor")), 50),
            AccessDecision::Authorized
        );
    }

    #[test]
    fn test_denials() {
        let h1 = ContentHash::from_bytes([1; 32]);
        let f1 = sealed(h1, "0xowner");
        let c = cap(FileScope::AllFiles);

        assert_eq!(
            check_capability(None, &h1, Some(&f1), None, 0),
            AccessDecision::Denied(DenyReason::UnknownCapability)
        );
        assert_eq!(
            check_capability(Some(&c), &h1, Some(&f1), None, 100_000),
            AccessDecision::Denied(DenyReason::Expired)
        );
        assert_eq!(
            check_capability(Some(&c), &h1, Some(&f1), Some(&p("0xmallory")), 1),
            AccessDecision::Denied(DenyReason::WrongHolder)
        );
        let revoked = c.revoked(1).unwrap();
        assert_eq!(
            check_capability(Some(&revoked), &h1, Some(&f1), None, 2),
            AccessDecision::Denied(DenyReason::Revoked)
        );
        assert_eq!(
            check_capability(Some(&c), &h1, None, None, 1),
            AccessDecision::Denied(DenyReason::OutOfScope)
        );
    }

    #[test]
    fn test_all_files_excludes_other_owners() {
        let h = ContentHash::from_bytes([9; 32]);
        let foreign = sealed(h, "0xsomeone");
        let c = cap(FileScope::AllFiles);
        assert_eq!(
            check_capability(Some(&c), &h, Some(&foreign), None, 1),
            AccessDecision::Denied(DenyReason::OutOfScope)
        );
    }

    #[test]
    fn test_needs_expiry() {
        let c = cap(FileScope::AllFiles);
        assert!(!needs_expiry(&c, 99_999));
        assert!(needs_expiry(&c, 100_000));
        assert!(!needs_expiry(&c.expired(100_000).unwrap(), 200_000));
    }

    #[test]
    fn test_validate_duration() {
        assert!(validate_duration(0, 10).is_err());
        assert!(validate_duration(11, 10).is_err());
        assert!(validate_duration(10, 10).is_ok());
    }

    #[test]
    fn test_validate_scope() {
        let h1 = ContentHash::from_bytes([1; 32]);
        let h2 = ContentHash::from_bytes([2; 32]);
        let h3 = ContentHash::from_bytes([3; 32]);
        let files: HashMap<_, _> = [
            (h1, sealed(h1, "0xowner")),
            (h2, sealed(h2, "0xother")),
        ]
        .into_iter()
        .collect();
        let owner = p("0xowner");
        let lookup = |h: &ContentHash| files.get(h);

        assert!(validate_scope(&FileScope::AllFiles, &owner, lookup).is_ok());
        assert!(validate_scope(&FileScope::files([h1]), &owner, lookup).is_ok());
        assert!(validate_scope(&FileScope::FileSet(Default::default()), &owner, lookup).is_err());
        assert!(validate_scope(&FileScope::files([h1, h2]), &owner, lookup).is_err());
        assert!(validate_scope(&FileScope::files([h3]), &owner, lookup).is_err());
    }

    proptest! {
        #[test]
        fn prop_file_set_denies_unlisted(
            listed in prop::collection::btree_set(any::<[u8; 32]>(), 1..8),
            candidate in any::<[u8; 32]>(),
        ) {
            let listed: Vec<ContentHash> = listed.into_iter().map(ContentHash::from_bytes).collect();
            let candidate = ContentHash::from_bytes(candidate);
            let c = cap(FileScope::files(listed.iter().copied()));
            let file = sealed(candidate, "0xowner");
            let decision = check_capability(Some(&c), &candidate, Some(&file), None, 1);
            prop_assert_eq!(decision.is_authorized(), listed.contains(&candidate));
        }

        #[test]
        fn prop_never_authorized_after_expiry(offset in 0i64..1_000_000) {
            let h = ContentHash::from_bytes([1; 32]);
            let c = cap(FileScope::AllFiles);
            let file = sealed(h, "0xowner");
            let decision = check_capability(Some(&c), &h, Some(&file), None, c.expires_at + offset);
            prop_assert_eq!(decision, AccessDecision::Denied(DenyReason::Expired));
        }
    }
}
