//! Vault configuration.
//!
//! Every section has defaults, so a partial TOML file only needs to name the
//! values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level vault configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub ledger: LedgerConfig,
    pub sealing: SealingConfig,
    pub access: AccessConfig,
}

/// Audit ledger write policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts per append before the enclosing transaction fails.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each failure.
    pub retry_backoff_ms: u64,
    /// Deadline for a single store call.
    pub timeout_ms: u64,
    /// Check every hash and signature while replaying on open.
    pub verify_on_open: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 50,
            timeout_ms: 5_000,
            verify_on_open: true,
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sealing pipeline limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealingConfig {
    /// Largest accepted upload, in bytes.
    pub max_file_size: u64,
    /// Emit a progress notification for every uploaded chunk.
    pub chunk_progress: bool,
    /// Derive keys from content so re-sealing the same bytes is idempotent.
    pub convergent_keys: bool,
    /// Pipelines allowed to run at once.
    pub max_in_flight: usize,
    /// Finished submissions whose status stays queryable. Older ones are
    /// forgotten first.
    pub retain_finished: usize,
    pub store_timeout_ms: u64,
    pub store_max_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024,
            chunk_progress: true,
            convergent_keys: true,
            max_in_flight: 8,
            retain_finished: 1024,
            store_timeout_ms: 5_000,
            store_max_attempts: 3,
            store_retry_backoff_ms: 50,
        }
    }
}

impl SealingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Access control limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Longest duration a request or grant may ask for.
    pub max_grant_duration_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            max_grant_duration_secs: 365 * 24 * 60 * 60,
        }
    }
}
