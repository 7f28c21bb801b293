//! Error types for SealVault Core.

use thiserror::Error;

/// Errors raised by the crypto engine.
///
/// None of these are retryable: a failure here is fatal for the submission
/// or read that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The RNG or cipher failed while encrypting.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag did not match; no plaintext is returned.
    #[error("integrity violation: ciphertext or tag has been altered")]
    IntegrityViolation,

    /// The key envelope could not be opened with the given secret.
    #[error("key unwrap failed")]
    KeyUnwrapFailed,

    /// The key envelope bytes are not a valid envelope.
    #[error("malformed key envelope: {0}")]
    MalformedEnvelope(String),

    /// A ciphertext blob is too short to carry its nonce.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
}

/// Core errors for identifiers, encoding and signatures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid principal id: {0}")]
    InvalidPrincipal(String),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] hex::FromHexError),

    #[error("unknown audit kind: {0}")]
    UnknownKind(u16),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
