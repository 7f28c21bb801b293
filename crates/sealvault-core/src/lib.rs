//! # SealVault Core
//!
//! Pure primitives for SealVault: identifiers, the crypto engine, and the
//! audit event hash chain.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`ContentHash`] - Content address of a sealed ciphertext (Blake3)
//! - [`PrincipalId`] - Stable identifier of an owner or grantee
//! - [`CapabilityId`] / [`RequestId`] - Unguessable random identifiers
//! - [`AuditEvent`] - One link of the append-only, tamper-evident ledger
//!
//! ## Crypto Engine
//!
//! Files are sealed with ChaCha20-Poly1305 under a per-file key. The file key
//! is then wrapped for the owner with an ephemeral X25519 exchange, see
//! [`envelope`]. Audit events are hashed into a chain using deterministic
//! CBOR, see [`canonical`], and signed by the ledger's Ed25519 key.

pub mod audit;
pub mod canonical;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod signing;
pub mod time;
pub mod types;

pub use audit::{find_chain_break, AuditEvent, AuditKind, EventDraft, Subject};
pub use canonical::{event_hash, event_hash_input};
pub use crypto::{
    decrypt, derive_file_key, encrypt, encrypt_with_nonce, generate_file_key, hash_content,
    Ciphertext, ConvergenceSecret, IntegrityTag, Nonce, SymmetricKey,
};
pub use envelope::{unwrap_key, wrap_key, KeyEnvelope, X25519PublicKey, X25519StaticSecret};
pub use error::{CoreError, CryptoError};
pub use signing::{EventSignature, LedgerKeypair, LedgerPublicKey};
pub use time::{now_millis, Clock, ManualClock, SystemClock};
pub use types::{CapabilityId, ChainHash, ContentHash, PrincipalId, RequestId, SubmissionId};
