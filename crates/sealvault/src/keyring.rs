//! Custodial key material.
//!
//! The vault wraps each file key for its owner and unwraps it again on an
//! authorized read, so it needs every owner's X25519 secret. A [`Keyring`]
//! supplies them. How those keys are provisioned is outside the vault.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use rand::RngCore;

use sealvault_core::{ConvergenceSecret, LedgerKeypair, PrincipalId, X25519PublicKey, X25519StaticSecret};

const LEDGER_KEY_CONTEXT: &str = "sealvault v1 ledger signing key";
const CONVERGENCE_CONTEXT: &str = "sealvault v1 convergence secret";
const PRINCIPAL_KEY_CONTEXT: &str = "sealvault v1 principal key";

/// Source of per-principal X25519 keys.
pub trait Keyring: Send + Sync + 'static {
    /// The principal's secret, minting one on first use where supported.
    fn secret(&self, principal: &PrincipalId) -> X25519StaticSecret;

    fn public_key(&self, principal: &PrincipalId) -> X25519PublicKey {
        self.secret(principal).public_key()
    }
}

/// Keys held in memory, minted at random on first use. Lost on drop.
#[derive(Default)]
pub struct MemoryKeyring {
    keys: RwLock<HashMap<PrincipalId, X25519StaticSecret>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of principals with a key.
    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Keyring for MemoryKeyring {
    fn secret(&self, principal: &PrincipalId) -> X25519StaticSecret {
        if let Some(key) = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(principal)
        {
            return key.clone();
        }
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(principal.clone())
            .or_insert_with(X25519StaticSecret::generate)
            .clone()
    }
}

/// The vault's root secret. Every other key is derived from it.
#[derive(Clone)]
pub struct MasterSecret([u8; 32]);

impl MasterSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The key that signs audit events.
    pub fn ledger_keypair(&self) -> LedgerKeypair {
        LedgerKeypair::from_seed(&blake3::derive_key(LEDGER_KEY_CONTEXT, &self.0))
    }

    /// The secret that convergent file keys are derived from.
    pub fn convergence_secret(&self) -> ConvergenceSecret {
        ConvergenceSecret::from_bytes(blake3::derive_key(CONVERGENCE_CONTEXT, &self.0))
    }

    fn principal_secret(&self, principal: &PrincipalId) -> X25519StaticSecret {
        let mut hasher = blake3::Hasher::new_derive_key(PRINCIPAL_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(principal.as_str().as_bytes());
        X25519StaticSecret::from_bytes(*hasher.finalize().as_bytes())
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

/// Keys derived deterministically from a [`MasterSecret`], so a vault
/// reopened with the same secret can still unwrap every envelope.
#[derive(Debug, Clone)]
pub struct DerivedKeyring {
    master: MasterSecret,
}

impl DerivedKeyring {
    pub fn new(master: MasterSecret) -> Self {
        Self { master }
    }
}

impl Keyring for DerivedKeyring {
    fn secret(&self, principal: &PrincipalId) -> X25519StaticSecret {
        self.master.principal_secret(principal)
    }
}
