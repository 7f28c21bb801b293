//! Error types for the store module.

use sealvault_core::ContentHash;
use thiserror::Error;

/// Errors that can occur during content store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blob does not hash to the address it was stored under.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Errors raised by ledger storage.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Storage could not be reached or did not answer in time.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The batch does not extend the current tail.
    #[error("ledger conflict at seq {seq}: {reason}")]
    Conflict { seq: u64, reason: String },

    /// The batch is not a contiguous, linked run of events.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Stored events could not be decoded.
    #[error("ledger corrupt: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            return Self::Unavailable(e.to_string());
        }
        match e {
            StoreError::Database(db) => Self::Unavailable(db.to_string()),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::from(e).into()
    }
}

/// Result type for content store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Result type for ledger store operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::InvalidData("bad".into()).is_transient());
        assert!(LedgerError::from(StoreError::Unavailable("down".into())).is_transient());
        assert!(!LedgerError::InvalidBatch("gap".into()).is_transient());
    }
}
