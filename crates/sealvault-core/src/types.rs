//! Strong type definitions for SealVault.
//!
//! All identifiers are newtypes to prevent misuse at compile time. The
//! 32-byte identifiers share one implementation via `byte_id!`: raw bytes in
//! binary encodings (CBOR), lowercase hex in human-readable ones (JSON).

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CoreError;

/// Maximum length of a principal identifier.
pub const MAX_PRINCIPAL_LEN: usize = 128;

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// The all-zero value (sentinel).
            pub const ZERO: Self = Self([0u8; 32]);
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::from_hex(s)?)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                fixed_bytes::serialize(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                fixed_bytes::deserialize(deserializer).map(Self)
            }
        }
    };
}

/// Serde helpers for fixed-size byte arrays that are not identifiers
/// (nonces, tags, public keys). Same encoding rules as the ids.
pub mod fixed_bytes {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        struct FixedVisitor<const N: usize>;

        impl<'de, const N: usize> Visitor<'de> for FixedVisitor<N> {
            type Value = [u8; N];

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{N} bytes or their hex encoding")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let bytes = hex::decode(v).map_err(E::custom)?;
                self.visit_bytes(&bytes)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                v.try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut arr = [0u8; N];
                for (i, slot) in arr.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(arr)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(FixedVisitor::<N>)
        } else {
            deserializer.deserialize_bytes(FixedVisitor::<N>)
        }
    }
}

/// Serde helpers for variable-length byte strings: hex text in
/// human-readable formats, a byte string otherwise.
pub mod byte_vec {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BufVisitor;

        impl<'de> Visitor<'de> for BufVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string or its hex encoding")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                hex::decode(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(b) = seq.next_element()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BufVisitor)
        } else {
            deserializer.deserialize_byte_buf(BufVisitor)
        }
    }
}

fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

byte_id!(
    /// Content address of a sealed file: Blake3 over its ciphertext blob.
    ///
    /// Two blobs with the same bytes always have the same hash, so the hash
    /// doubles as the file's identity.
    ContentHash,
    "ContentHash"
);

byte_id!(
    /// A link in the audit hash chain.
    ChainHash,
    "ChainHash"
);

byte_id!(
    /// Identifier of a capability. Random, so it cannot be guessed.
    CapabilityId,
    "CapabilityId"
);

byte_id!(
    /// Identifier of an access request.
    RequestId,
    "RequestId"
);

byte_id!(
    /// Identifier of one in-flight sealing submission.
    SubmissionId,
    "SubmissionId"
);

impl CapabilityId {
    /// Generate a fresh random capability id.
    pub fn generate() -> Self {
        Self(random_bytes())
    }
}

impl RequestId {
    /// Generate a fresh random request id.
    pub fn generate() -> Self {
        Self(random_bytes())
    }
}

impl SubmissionId {
    /// Generate a fresh random submission id.
    pub fn generate() -> Self {
        Self(random_bytes())
    }
}

/// Any identified actor: an owner, a doctor, or the vault itself.
///
/// Typically a wallet address. Opaque to the core beyond basic hygiene.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create a principal id, rejecting empty, oversized or whitespace-bearing ids.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidPrincipal("empty".into()));
        }
        if id.len() > MAX_PRINCIPAL_LEN {
            return Err(CoreError::InvalidPrincipal(format!(
                "longer than {MAX_PRINCIPAL_LEN} bytes"
            )));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CoreError::InvalidPrincipal(
                "contains whitespace or control characters".into(),
            ));
        }
        Ok(Self(id))
    }

    /// The principal recorded as actor for transitions the vault performs
    /// on its own, such as lazy expiry.
    pub fn system() -> Self {
        Self("sealvault:system".to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrincipalId> for String {
    fn from(id: PrincipalId) -> Self {
        id.0
    }
}

impl std::str::FromStr for PrincipalId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
