//! Key envelopes: file keys wrapped for their owner.
//!
//! A file key is encrypted to the owner's X25519 public key via an ephemeral
//! key agreement. The wrap key is derived from the shared secret and bound to
//! the file's content hash, so an envelope cannot be replayed onto another
//! file.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce as AeadNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::crypto::{Nonce, SymmetricKey};
use crate::error::CryptoError;
use crate::types::{byte_vec, fixed_bytes, ContentHash};

const WRAP_KEY_CONTEXT: &str = "sealvault v1 key envelope";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(#[serde(with = "fixed_bytes")] pub [u8; 32]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &hex::encode(self.0)[..16])
    }
}

/// An X25519 static secret held by the keyring on behalf of a principal.
#[derive(Clone)]
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    fn diffie_hellman(&self, peer: &X25519PublicKey) -> [u8; 32] {
        *self.0.diffie_hellman(&peer.to_dalek()).as_bytes()
    }
}

impl fmt::Debug for X25519StaticSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Secret({:?})", self.public_key())
    }
}

/// A file key, encrypted for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub version: u8,

    /// Sender side of the key agreement.
    pub ephemeral_public: X25519PublicKey,

    pub nonce: Nonce,

    /// The 32-byte file key plus its 16-byte tag.
    #[serde(with = "byte_vec")]
    pub wrapped_key: Vec<u8>,
}

impl KeyEnvelope {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let envelope: Self = ciborium::from_reader(bytes)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::MalformedEnvelope(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}

fn derive_wrap_key(shared: &[u8; 32], binding: &ContentHash) -> Key {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(binding.as_bytes());
    *Key::from_slice(hasher.finalize().as_bytes())
}

/// Wrap a file key for its owner.
pub fn wrap_key(
    file_key: &SymmetricKey,
    owner_public: &X25519PublicKey,
    binding: &ContentHash,
) -> Result<KeyEnvelope, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
    let ephemeral_public = X25519PublicKey::from(PublicKey::from(&ephemeral));
    let shared = ephemeral.diffie_hellman(&owner_public.to_dalek());

    let wrap = derive_wrap_key(shared.as_bytes(), binding);
    let nonce = Nonce::generate()?;
    let wrapped_key = ChaCha20Poly1305::new(&wrap)
        .encrypt(AeadNonce::from_slice(nonce.as_bytes()), file_key.as_bytes().as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(KeyEnvelope {
        version: ENVELOPE_VERSION,
        ephemeral_public,
        nonce,
        wrapped_key,
    })
}

/// Recover a file key with the owner's secret.
pub fn unwrap_key(
    envelope: &KeyEnvelope,
    owner_secret: &X25519StaticSecret,
    binding: &ContentHash,
) -> Result<SymmetricKey, CryptoError> {
    let shared = owner_secret.diffie_hellman(&envelope.ephemeral_public);
    let wrap = derive_wrap_key(&shared, binding);
    let key_bytes = ChaCha20Poly1305::new(&wrap)
        .decrypt(
            AeadNonce::from_slice(envelope.nonce.as_bytes()),
            envelope.wrapped_key.as_slice(),
        )
        .map_err(|_| CryptoError::KeyUnwrapFailed)?;

    let arr: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope("wrapped key is not 32 bytes".into()))?;
    Ok(SymmetricKey::from_bytes(arr))
}
