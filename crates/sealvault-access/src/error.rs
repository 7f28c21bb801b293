//! Error types for the access module.

use sealvault_core::{CapabilityId, ContentHash, PrincipalId, RequestId};
use thiserror::Error;

/// Errors that can occur during access control operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Only the owner may perform this operation.
    #[error("{principal} is not the owner")]
    NotOwner { principal: PrincipalId },

    /// The transition is not allowed from the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed or out-of-bounds input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file not found: {0}")]
    UnknownFile(ContentHash),

    #[error("capability not found: {0}")]
    UnknownCapability(CapabilityId),

    #[error("request not found: {0}")]
    UnknownRequest(RequestId),

    /// An event detail could not be encoded or decoded.
    #[error("event detail: {0}")]
    Detail(String),

    /// Events were applied out of order.
    #[error("expected event {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
