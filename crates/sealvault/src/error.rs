//! Error types for vault operations.
//!
//! Lower layers return their own error enums. The pipeline and the access
//! engine classify them into a [`Cause`] and attach the operation (and, for
//! sealing, the stage) that failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sealvault_access::{AccessError, DenyReason};
use sealvault_core::{CoreError, CryptoError, PrincipalId};
use sealvault_store::{LedgerError, StoreError};

/// The public operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Open,
    Seal,
    SubmitRequest,
    Decide,
    Grant,
    Revoke,
    Renew,
    CheckAccess,
    ReadFile,
    Audit,
    Query,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Seal => "seal",
            Self::SubmitRequest => "submit_request",
            Self::Decide => "decide",
            Self::Grant => "grant",
            Self::Revoke => "revoke",
            Self::Renew => "renew",
            Self::CheckAccess => "check_access",
            Self::ReadFile => "read_file",
            Self::Audit => "audit",
            Self::Query => "query",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealing pipeline stage that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploading,
    Encrypting,
    Committing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Encrypting => "encrypting",
            Self::Committing => "committing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable error classification, as exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Crypto,
    Authorization,
    InvalidState,
    LedgerUnavailable,
    NotFound,
    InvalidInput,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Crypto => "crypto",
            Self::Authorization => "authorization",
            Self::InvalidState => "invalid_state",
            Self::LedgerUnavailable => "ledger_unavailable",
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause {
    /// Transient storage or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("{principal} is not the owner")]
    NotOwner { principal: PrincipalId },

    /// A capability check refused access.
    #[error("access denied: {0}")]
    Denied(DenyReason),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,

    /// An invariant of the vault itself does not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Cause {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::NotOwner { .. } | Self::Denied(_) => ErrorKind::Authorization,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::LedgerUnavailable(_) => ErrorKind::LedgerUnavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<AccessError> for Cause {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::NotOwner { principal } => Self::NotOwner { principal },
            AccessError::InvalidState(msg) => Self::InvalidState(msg),
            AccessError::InvalidInput(msg) => Self::InvalidInput(msg),
            AccessError::UnknownFile(_)
            | AccessError::UnknownCapability(_)
            | AccessError::UnknownRequest(_) => Self::NotFound(e.to_string()),
            AccessError::Detail(_) | AccessError::OutOfOrder { .. } => Self::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for Cause {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(msg) => Self::LedgerUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for Cause {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(_) | StoreError::Unavailable(_) | StoreError::Io(_) => {
                Self::Io(e.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for Cause {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Crypto(c) => Self::Crypto(c),
            CoreError::InvalidPrincipal(_) | CoreError::InvalidId(_) => {
                Self::InvalidInput(e.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A failed vault operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct VaultError {
    pub operation: Operation,
    /// Set for sealing failures.
    pub stage: Option<Stage>,
    #[source]
    pub cause: Cause,
}

impl VaultError {
    pub fn new(operation: Operation, cause: impl Into<Cause>) -> Self {
        Self {
            operation,
            stage: None,
            cause: cause.into(),
        }
    }

    /// A sealing failure at `stage`.
    pub fn sealing(stage: Stage, cause: impl Into<Cause>) -> Self {
        Self {
            operation: Operation::Seal,
            stage: Some(stage),
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    /// Transient failures that may succeed if the caller tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::LedgerUnavailable)
    }
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} failed at {}: {}", self.operation, stage, self.cause),
            None => write!(f, "{} failed: {}", self.operation, self.cause),
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Attach the failing operation to a lower-layer error.
pub(crate) trait OperationExt<T> {
    fn during(self, operation: Operation) -> Result<T>;
}

impl<T, E: Into<Cause>> OperationExt<T> for std::result::Result<T, E> {
    fn during(self, operation: Operation) -> Result<T> {
        self.map_err(|e| VaultError::new(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealvault_core::CapabilityId;

    #[test]
    fn test_kinds() {
        let e = VaultError::new(
            Operation::Revoke,
            AccessError::UnknownCapability(CapabilityId::from_bytes([0; 32])),
        );
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(!e.is_retryable());

        let e = VaultError::sealing(Stage::Committing, LedgerError::Unavailable("down".into()));
        assert_eq!(e.kind(), ErrorKind::LedgerUnavailable);
        assert!(e.is_retryable());
        assert_eq!(
            e.to_string(),
            "seal failed at committing: ledger unavailable: down"
        );

        let e = VaultError::new(Operation::ReadFile, CryptoError::IntegrityViolation);
        assert_eq!(e.kind(), ErrorKind::Crypto);
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::LedgerUnavailable).unwrap();
        assert_eq!(json, "\"ledger_unavailable\"");
        let json = serde_json::to_string(&Operation::SubmitRequest).unwrap();
        assert_eq!(json, format!("\"{}\"", Operation::SubmitRequest.as_str()));
    }
}
