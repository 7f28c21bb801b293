//! # SealVault Access
//!
//! Capabilities, access requests and the vault index.
//!
//! ## Overview
//!
//! Access control is expressed as records carried by audit events. A
//! capability is minted by an owner, is scoped to a fixed set of files
//! (or all of the owner's files), and ends for good when it is revoked or
//! its expiry passes. The [`VaultIndex`] is the queryable state obtained by
//! replaying those events in order.
//!
//! ## Key Types
//!
//! - [`SealedFile`] - An encrypted file and its wrapped key
//! - [`Capability`] - A time-bounded, file-scoped read grant
//! - [`AccessRequest`] - A request that an owner approves or declines once
//! - [`VaultIndex`] - Projection of the ledger, rebuilt by replay
//! - [`check_capability`] - Pure authorization decision

pub mod error;
pub mod index;
pub mod payload;
pub mod policy;
pub mod records;

pub use error::{AccessError, Result};
pub use index::{VaultIndex, VaultStats};
pub use payload::{decode_detail, encode_detail, EventDetail, FileAccessedPayload};
pub use policy::{
    check_capability, needs_expiry, validate_duration, validate_scope, AccessDecision, DenyReason,
};
pub use records::{
    AccessRequest, Capability, CapabilityStatus, Decision, FileScope, FileStatus, SealedFile,
    Verdict,
};
