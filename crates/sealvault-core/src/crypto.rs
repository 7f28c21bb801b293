//! The crypto engine: per-file keys, authenticated encryption, content hashing.
//!
//! Files are sealed with ChaCha20-Poly1305. The 16-byte tag is kept detached
//! from the ciphertext so it can live in the sealed-file record while the blob
//! itself is content-addressed in the store.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce as AeadNonce, Tag,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{fixed_bytes, ContentHash, PrincipalId};

const CONTENT_HASH_CONTEXT: &str = "sealvault v1 content hash";
const CONVERGENT_KEY_CONTEXT: &str = "sealvault v1 convergent file key";

/// Length of a ChaCha20-Poly1305 nonce.
pub const NONCE_LEN: usize = 12;

/// Length of a Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// A 256-bit per-file symmetric key.
///
/// Never persisted in the clear; see [`crate::envelope::wrap_key`].
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce(#[serde(with = "fixed_bytes")] pub [u8; NONCE_LEN]);

impl Nonce {
    /// Generate a random nonce.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; NONCE_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// The detached Poly1305 tag of a sealed file.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityTag(#[serde(with = "fixed_bytes")] pub [u8; TAG_LEN]);

impl IntegrityTag {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; TAG_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

impl fmt::Debug for IntegrityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntegrityTag({})", hex::encode(self.0))
    }
}

/// Encrypted file contents together with the nonce they were sealed under.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub nonce: Nonce,
    pub bytes: Vec<u8>,
}

impl Ciphertext {
    /// The stored blob: `nonce || ciphertext`.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(NONCE_LEN + self.bytes.len());
        blob.extend_from_slice(&self.nonce.0);
        blob.extend_from_slice(&self.bytes);
        blob
    }

    /// Split a stored blob back into nonce and ciphertext.
    pub fn from_blob(blob: &[u8]) -> Result<Self, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "blob of {} bytes is shorter than the nonce",
                blob.len()
            )));
        }
        let (nonce, bytes) = blob.split_at(NONCE_LEN);
        let mut arr = [0u8; NONCE_LEN];
        arr.copy_from_slice(nonce);
        Ok(Self {
            nonce: Nonce(arr),
            bytes: bytes.to_vec(),
        })
    }

    /// Content address of this ciphertext's blob.
    pub fn content_hash(&self) -> ContentHash {
        hash_content(&self.to_blob())
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ciphertext")
            .field("nonce", &self.nonce)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Vault-held secret that makes convergent keys unpredictable to outsiders.
#[derive(Clone)]
pub struct ConvergenceSecret([u8; 32]);

impl ConvergenceSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ConvergenceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConvergenceSecret(..)")
    }
}

fn fill_random(bytes: &mut [u8]) -> Result<(), CryptoError> {
    rand::thread_rng()
        .try_fill_bytes(bytes)
        .map_err(|e| CryptoError::EncryptionFailed(format!("rng: {e}")))
}

/// Generate a fresh random file key.
pub fn generate_file_key() -> Result<SymmetricKey, CryptoError> {
    let mut bytes = [0u8; 32];
    fill_random(&mut bytes)?;
    Ok(SymmetricKey(bytes))
}

/// Derive a file key and nonce from the plaintext itself.
///
/// The same owner sealing the same bytes gets the same key and nonce, and
/// therefore the same ciphertext and [`ContentHash`]. Owners are length
/// prefixed into the derivation so two owners never share a key.
pub fn derive_file_key(
    secret: &ConvergenceSecret,
    owner: &PrincipalId,
    plaintext: &[u8],
) -> (SymmetricKey, Nonce) {
    let mut hasher = blake3::Hasher::new_derive_key(CONVERGENT_KEY_CONTEXT);
    hasher.update(&secret.0);
    hasher.update(&(owner.as_str().len() as u64).to_le_bytes());
    hasher.update(owner.as_str().as_bytes());
    hasher.update(plaintext);

    let mut out = [0u8; 32 + NONCE_LEN];
    hasher.finalize_xof().fill(&mut out);

    let mut key = [0u8; 32];
    key.copy_from_slice(&out[..32]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&out[32..]);
    (SymmetricKey(key), Nonce(nonce))
}

/// Encrypt under a fresh random nonce.
pub fn encrypt(
    plaintext: &[u8],
    key: &SymmetricKey,
) -> Result<(Ciphertext, IntegrityTag), CryptoError> {
    let nonce = Nonce::generate()?;
    encrypt_with_nonce(plaintext, key, nonce)
}

/// Encrypt under a caller-chosen nonce.
///
/// A nonce must never be reused with the same key for different plaintexts.
/// [`derive_file_key`] satisfies this because its nonce is bound to the
/// plaintext.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &SymmetricKey,
    nonce: Nonce,
) -> Result<(Ciphertext, IntegrityTag), CryptoError> {
    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(AeadNonce::from_slice(&nonce.0), b"", &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok((
        Ciphertext {
            nonce,
            bytes: buffer,
        },
        IntegrityTag(tag_bytes),
    ))
}

/// Decrypt and authenticate. Returns nothing at all if the tag does not match.
pub fn decrypt(
    ciphertext: &Ciphertext,
    key: &SymmetricKey,
    tag: &IntegrityTag,
) -> Result<Vec<u8>, CryptoError> {
    let mut buffer = ciphertext.bytes.clone();
    key.cipher()
        .decrypt_in_place_detached(
            AeadNonce::from_slice(&ciphertext.nonce.0),
            b"",
            &mut buffer,
            Tag::from_slice(&tag.0),
        )
        .map_err(|_| CryptoError::IntegrityViolation)?;
    Ok(buffer)
}

/// Domain-separated Blake3 content address.
pub fn hash_content(bytes: &[u8]) -> ContentHash {
    let mut hasher = blake3::Hasher::new_derive_key(CONTENT_HASH_CONTEXT);
    hasher.update(bytes);
    ContentHash(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owner(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = generate_file_key().unwrap();
        let (ct, tag) = encrypt(b"report-A", &key).unwrap();
        assert_ne!(ct.bytes, b"report-A");
        assert_eq!(decrypt(&ct, &key, &tag).unwrap(), b"report-A");
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_violation() {
        let key = generate_file_key().unwrap();
        let (mut ct, tag) = encrypt(b"lab results", &key).unwrap();
        ct.bytes[0] ^= 0x01;
        assert_eq!(
            decrypt(&ct, &key, &tag),
            Err(CryptoError::IntegrityViolation)
        );
    }

    #[test]
    fn test_wrong_tag_is_integrity_violation() {
        let key = generate_file_key().unwrap();
        let (ct, mut tag) = encrypt(b"lab results", &key).unwrap();
        tag.0[15] ^= 0x80;
        assert_eq!(
            decrypt(&ct, &key, &tag),
            Err(CryptoError::IntegrityViolation)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let (ct, tag) = encrypt(b"secret", &generate_file_key().unwrap()).unwrap();
        assert!(decrypt(&ct, &generate_file_key().unwrap(), &tag).is_err());
    }

    #[test]
    fn test_blob_roundtrip() {
        let key = generate_file_key().unwrap();
        let (ct, _) = encrypt(b"scan.png", &key).unwrap();
        let blob = ct.to_blob();
        assert_eq!(blob.len(), NONCE_LEN + ct.bytes.len());
        assert_eq!(Ciphertext::from_blob(&blob).unwrap(), ct);
    }

    #[test]
    fn test_short_blob_rejected() {
        assert!(matches!(
            Ciphertext::from_blob(&[0u8; 5]),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_file_key().unwrap();
        let (ct, tag) = encrypt(b"", &key).unwrap();
        assert!(ct.bytes.is_empty());
        assert!(decrypt(&ct, &key, &tag).unwrap().is_empty());
    }

    #[test]
    fn test_hash_is_domain_separated() {
        let data = b"test data";
        assert_eq!(hash_content(data), hash_content(data));
        assert_ne!(hash_content(data).0, *blake3::hash(data).as_bytes());
        assert_ne!(hash_content(data), hash_content(b"different data"));
    }

    #[test]
    fn test_convergent_key_is_deterministic_per_owner() {
        let secret = ConvergenceSecret::from_bytes([0x11; 32]);
        let (k1, n1) = derive_file_key(&secret, &owner("0xalice"), b"report-A");
        let (k2, n2) = derive_file_key(&secret, &owner("0xalice"), b"report-A");
        let (k3, _) = derive_file_key(&secret, &owner("0xbob"), b"report-A");
        let (k4, _) = derive_file_key(&secret, &owner("0xalice"), b"report-B");
        assert_eq!(k1, k2);
        assert_eq!(n1, n2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);
    }

    #[test]
    fn test_owner_prefix_prevents_boundary_collisions() {
        let secret = ConvergenceSecret::from_bytes([0x22; 32]);
        let (k1, _) = derive_file_key(&secret, &owner("ab"), b"c");
        let (k2, _) = derive_file_key(&secret, &owner("a"), b"bc");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_key_debug_hides_material() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        assert_eq!(format!("{:?}", key), "SymmetricKey(..)");
    }

    proptest! {
        #[test]
        fn prop_convergent_sealing_is_idempotent(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let secret = ConvergenceSecret::from_bytes([0x33; 32]);
            let who = owner("0xowner");
            let (key, nonce) = derive_file_key(&secret, &who, &data);
            let (ct1, tag1) = encrypt_with_nonce(&data, &key, nonce).unwrap();
            let (key, nonce) = derive_file_key(&secret, &who, &data);
            let (ct2, tag2) = encrypt_with_nonce(&data, &key, nonce).unwrap();
            prop_assert_eq!(ct1.content_hash(), ct2.content_hash());
            prop_assert_eq!(tag1, tag2);
            prop_assert_eq!(decrypt(&ct1, &key, &tag1).unwrap(), data);
        }
    }
}
