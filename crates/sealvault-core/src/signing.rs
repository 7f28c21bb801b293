//! The ledger's signing identity.
//!
//! One Ed25519 key signs the chain hash of every audit event. Anyone holding
//! the public half can tell whether a ledger was written by this vault.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{fixed_bytes, ChainHash};

/// Public half of the ledger key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LedgerPublicKey(VerifyingKey);

impl LedgerPublicKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Check that `signature` was made over `hash` with this key.
    pub fn verify_event(&self, hash: &ChainHash, signature: &EventSignature) -> Result<(), CoreError> {
        self.0
            .verify(hash.as_bytes(), &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for LedgerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerPublicKey({})", &self.to_hex()[..16])
    }
}

/// Signature over one event's chain hash.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSignature(#[serde(with = "fixed_bytes")] pub [u8; 64]);

impl fmt::Debug for EventSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventSignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// The key the audit ledger stamps every event with.
#[derive(Clone)]
pub struct LedgerKeypair(SigningKey);

impl LedgerKeypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Deterministic keypair, for keys derived from the vault secret.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> LedgerPublicKey {
        LedgerPublicKey(self.0.verifying_key())
    }

    pub fn sign_event(&self, hash: &ChainHash) -> EventSignature {
        EventSignature(self.0.sign(hash.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for LedgerKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerKeypair({:?})", self.public_key())
    }
}
