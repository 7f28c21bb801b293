//! Bounded retry with a per-call deadline.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use sealvault_store::{LedgerError, StoreError};

use crate::config::{LedgerConfig, SealingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_ms.saturating_mul(1 << shift))
    }
}

impl From<&LedgerConfig> for RetryPolicy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            attempts: config.max_attempts.max(1),
            timeout: config.timeout(),
            backoff_ms: config.retry_backoff_ms,
        }
    }
}

impl From<&SealingConfig> for RetryPolicy {
    fn from(config: &SealingConfig) -> Self {
        Self {
            attempts: config.store_max_attempts.max(1),
            timeout: config.store_timeout(),
            backoff_ms: config.store_retry_backoff_ms,
        }
    }
}

/// Errors that [`retry`] knows how to classify.
pub(crate) trait Retryable: Sized + Display {
    fn is_transient(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
    /// The error returned once every attempt has failed.
    fn exhausted(self, what: &str, attempts: u32) -> Self;
}

impl Retryable for LedgerError {
    fn is_transient(&self) -> bool {
        LedgerError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        Self::Unavailable(format!("timed out after {}ms", after.as_millis()))
    }

    fn exhausted(self, what: &str, attempts: u32) -> Self {
        Self::Unavailable(format!("{what} failed after {attempts} attempts: {self}"))
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        Self::Unavailable(format!("timed out after {}ms", after.as_millis()))
    }

    fn exhausted(self, _what: &str, _attempts: u32) -> Self {
        self
    }
}

/// Run `call` until it succeeds, fails permanently, or runs out of attempts.
pub(crate) async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &'static str, mut call: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => E::timed_out(policy.timeout),
        };

        tracing::warn!(
            op = what,
            attempt,
            max_attempts = policy.attempts,
            error = %error,
            "store call failed"
        );
        if attempt >= policy.attempts {
            return Err(error.exhausted(what, policy.attempts));
        }
        tokio::time::sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}
