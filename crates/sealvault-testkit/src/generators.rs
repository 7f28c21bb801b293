//! Proptest generators for property-based testing.

use proptest::prelude::*;

use sealvault_access::FileScope;
use sealvault_core::{CapabilityId, ContentHash, PrincipalId};

/// Generate a valid principal id.
pub fn principal() -> impl Strategy<Value = PrincipalId> {
    "0x[0-9a-f]{4,40}".prop_map(|s| PrincipalId::new(s).expect("pattern yields valid principals"))
}

/// Generate a random ContentHash.
pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    any::<[u8; 32]>().prop_map(ContentHash::from_bytes)
}

/// Generate a random CapabilityId.
pub fn capability_id() -> impl Strategy<Value = CapabilityId> {
    any::<[u8; 32]>().prop_map(CapabilityId::from_bytes)
}

/// Generate file contents of at most `max_len` bytes.
pub fn file_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a grant duration between one minute and thirty days.
pub fn duration_secs() -> impl Strategy<Value = u64> {
    60u64..=30 * 24 * 60 * 60
}

/// Generate a non-empty file-set scope over the given hashes.
pub fn file_set(hashes: Vec<ContentHash>) -> impl Strategy<Value = FileScope> {
    let len = hashes.len().max(1);
    prop::sample::subsequence(hashes, 1..=len).prop_map(|picked| FileScope::files(picked))
}

/// One step of a random vault workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultOp {
    /// Seal bytes as the owner.
    Seal(Vec<u8>),
    /// Grant the requester access to everything for `duration_secs`.
    Grant { duration_secs: u64 },
    /// Submit a request for everything, approve it when `approve`.
    Request { approve: bool },
    /// Revoke the capability at this position among those issued so far.
    Revoke(usize),
    /// Check the capability at this position against the latest file.
    Check(usize),
    /// Move the clock forward.
    Advance { secs: u64 },
    /// Read the latest file as the owner.
    Read,
}

impl Arbitrary for VaultOp {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            3 => file_bytes(256).prop_map(VaultOp::Seal),
            2 => duration_secs().prop_map(|duration_secs| VaultOp::Grant { duration_secs }),
            2 => any::<bool>().prop_map(|approve| VaultOp::Request { approve }),
            1 => (0usize..8).prop_map(VaultOp::Revoke),
            2 => (0usize..8).prop_map(VaultOp::Check),
            1 => (1u64..=40 * 24 * 60 * 60).prop_map(|secs| VaultOp::Advance { secs }),
            1 => Just(VaultOp::Read),
        ]
        .boxed()
    }
}

/// Generate a workload of up to `max_len` operations.
pub fn workload(max_len: usize) -> impl Strategy<Value = Vec<VaultOp>> {
    prop::collection::vec(any::<VaultOp>(), 1..=max_len)
}
