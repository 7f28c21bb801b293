//! Canonical CBOR encoding for audit event hashes.
//!
//! This module implements the subset of RFC 8949 Core Deterministic Encoding
//! the hash chain needs:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! The same event always produces identical bytes, and thus an identical
//! chain hash, on every platform.

use crate::audit::EventDraft;
use crate::types::ChainHash;

const EVENT_HASH_CONTEXT: &str = "sealvault v1 audit event";

/// Event field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const SEQ: u64 = 0;
    pub const PRIOR_HASH: u64 = 1;
    pub const KIND: u64 = 2;
    pub const ACTOR: u64 = 3;
    pub const SUBJECT_TYPE: u64 = 4;
    pub const SUBJECT_ID: u64 = 5;
    pub const TIMESTAMP: u64 = 6;
    pub const DETAIL: u64 = 7;
}

/// A value in the canonical encoding.
enum Field<'a> {
    Uint(u64),
    Int(i64),
    Bytes(&'a [u8]),
    Text(&'a str),
}

/// Canonical bytes hashed into the chain for one event.
pub fn event_hash_input(seq: u64, prior_hash: &ChainHash, draft: &EventDraft) -> Vec<u8> {
    let entries = [
        (keys::SEQ, Field::Uint(seq)),
        (keys::PRIOR_HASH, Field::Bytes(prior_hash.as_bytes())),
        (keys::KIND, Field::Uint(draft.kind.to_u16().into())),
        (keys::ACTOR, Field::Text(draft.actor.as_str())),
        (
            keys::SUBJECT_TYPE,
            Field::Uint(draft.subject.type_code().into()),
        ),
        (keys::SUBJECT_ID, Field::Bytes(draft.subject.id_bytes())),
        (keys::TIMESTAMP, Field::Int(draft.timestamp)),
        (keys::DETAIL, Field::Bytes(&draft.detail)),
    ];

    let mut buf = Vec::with_capacity(128 + draft.detail.len());
    encode_map_canonical(&mut buf, &entries);
    buf
}

/// The chain hash of one event.
pub fn event_hash(seq: u64, prior_hash: &ChainHash, draft: &EventDraft) -> ChainHash {
    let mut hasher = blake3::Hasher::new_derive_key(EVENT_HASH_CONTEXT);
    hasher.update(&event_hash_input(seq, prior_hash, draft));
    ChainHash(*hasher.finalize().as_bytes())
}

fn encode_field(buf: &mut Vec<u8>, field: &Field<'_>) {
    match field {
        Field::Uint(n) => encode_uint(buf, 0, *n),
        Field::Int(n) => encode_int(buf, *n),
        Field::Bytes(b) => encode_bytes(buf, b),
        Field::Text(s) => encode_text(buf, s),
    }
}

/// Encode a signed integer (major types 0 and 1).
fn encode_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(u64, Field<'_>)]) {
    let mut pairs: Vec<(Vec<u8>, &Field<'_>)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_uint(&mut key_buf, 0, *k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_field(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditKind, Subject};
    use crate::types::{CapabilityId, PrincipalId};
    use ciborium::value::Value;

    fn draft() -> EventDraft {
        EventDraft::new(
            AuditKind::CapabilityIssued,
            PrincipalId::new("0xowner").unwrap(),
            Subject::Capability(CapabilityId::from_bytes([0x42; 32])),
            1_700_000_000_000,
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_uint_minimal_encoding() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, [0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, [0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, [0x19, 0x01, 0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 1 << 32);
        assert_eq!(buf, [0x1b, 0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_negative_int() {
        let mut buf = Vec::new();
        encode_int(&mut buf, -1);
        assert_eq!(buf, [0x20]);

        buf.clear();
        encode_int(&mut buf, -25);
        assert_eq!(buf, [0x38, 24]);
    }

    #[test]
    fn test_hash_input_is_deterministic() {
        let d = draft();
        assert_eq!(
            event_hash_input(3, &ChainHash::ZERO, &d),
            event_hash_input(3, &ChainHash::ZERO, &d)
        );
        assert_eq!(
            event_hash(3, &ChainHash::ZERO, &d),
            event_hash(3, &ChainHash::ZERO, &d)
        );
    }

    #[test]
    fn test_hash_input_is_valid_cbor_map() {
        let bytes = event_hash_input(0, &ChainHash::ZERO, &draft());
        let value: Value = ciborium::from_reader(&bytes[..]).unwrap();
        match value {
            Value::Map(entries) => {
                assert_eq!(entries.len(), 8);
                let keys: Vec<i128> = entries
                    .iter()
                    .map(|(k, _)| match k {
                        Value::Integer(i) => (*i).into(),
                        _ => panic!("non-integer key"),
                    })
                    .collect();
                assert_eq!(keys, (0..8).collect::<Vec<i128>>());
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn test_every_field_affects_hash() {
        let base = draft();
        let h = event_hash(1, &ChainHash::ZERO, &base);

        assert_ne!(h, event_hash(2, &ChainHash::ZERO, &base));
        assert_ne!(h, event_hash(1, &ChainHash::from_bytes([1; 32]), &base));

        let mut d = base.clone();
        d.kind = AuditKind::CapabilityRevoked;
        assert_ne!(h, event_hash(1, &ChainHash::ZERO, &d));

        let mut d = base.clone();
        d.actor = PrincipalId::new("0xother").unwrap();
        assert_ne!(h, event_hash(1, &ChainHash::ZERO, &d));

        let mut d = base.clone();
        d.subject = Subject::Request(crate::types::RequestId::from_bytes([0x42; 32]));
        assert_ne!(h, event_hash(1, &ChainHash::ZERO, &d));

        let mut d = base.clone();
        d.timestamp -= 1;
        assert_ne!(h, event_hash(1, &ChainHash::ZERO, &d));

        let mut d = base;
        d.detail.push(4);
        assert_ne!(h, event_hash(1, &ChainHash::ZERO, &d));
    }
}
