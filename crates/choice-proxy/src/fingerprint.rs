//! Structural hashing of JSON-RPC `params`.
//!
//! The fingerprint identifies an audited request in the audit store. It is a
//! 64-bit structural hash built from truncated SHA-256 digests:
//! - arrays combine their elements in order, so reordering changes the result
//! - objects combine their entries order-independently (XOR of entry hashes)
//! - every value kind is tagged, so `"1"`, `1` and `[1]` hash differently
//!
//! Stable within one build of the proxy. Not a canonical content hash and
//! not guaranteed to be stable across versions.

use std::fmt;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Deepest nesting the traversal follows before giving up.
///
/// serde_json stops parsing at 128 levels as well, so a request body can
/// never carry `params` deep enough to reach this limit.
pub const MAX_DEPTH: usize = 128;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_UINT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_OBJECT: u8 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("params nested deeper than {max} levels")]
    TooDeep { max: usize },
}

/// Identity of an audited request, derived from its `params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Decimal string used as the audit-store document key.
    pub fn as_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Fingerprint a `params` value. A missing `params` is hashed as `null`.
pub fn fingerprint(params: Option<&Value>) -> Result<Fingerprint, FingerprintError> {
    let hash = match params {
        Some(value) => hash_value(value, 0)?,
        None => hash_value(&Value::Null, 0)?,
    };
    Ok(Fingerprint(hash))
}

/// SHA-256 over one node, truncated to its first 8 bytes.
struct NodeHasher(Sha256);

impl NodeHasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    fn write_u64(&mut self, n: u64) -> &mut Self {
        self.write(&n.to_le_bytes())
    }

    fn finish(&mut self) -> u64 {
        let digest = std::mem::take(&mut self.0).finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }
}

fn hash_value(value: &Value, depth: usize) -> Result<u64, FingerprintError> {
    if depth > MAX_DEPTH {
        return Err(FingerprintError::TooDeep { max: MAX_DEPTH });
    }

    let hash = match value {
        Value::Null => NodeHasher::new().write(&[TAG_NULL]).finish(),
        Value::Bool(b) => NodeHasher::new().write(&[TAG_BOOL, u8::from(*b)]).finish(),
        Value::Number(n) => hash_number(n),
        Value::String(s) => hash_str(s),
        Value::Array(items) => {
            let mut h = NodeHasher::new()
                .write(&[TAG_ARRAY])
                .write_u64(items.len() as u64)
                .finish();
            for item in items {
                let item_hash = hash_value(item, depth + 1)?;
                h = NodeHasher::new().write_u64(h).write_u64(item_hash).finish();
            }
            h
        }
        Value::Object(map) => hash_object(map, depth)?,
    };
    Ok(hash)
}

fn hash_object(map: &Map<String, Value>, depth: usize) -> Result<u64, FingerprintError> {
    let mut combined = 0u64;
    for (key, value) in map {
        let entry = NodeHasher::new()
            .write_u64(hash_str(key))
            .write_u64(hash_value(value, depth + 1)?)
            .finish();
        combined ^= entry;
    }
    Ok(NodeHasher::new()
        .write(&[TAG_OBJECT])
        .write_u64(map.len() as u64)
        .write_u64(combined)
        .finish())
}

fn hash_number(n: &Number) -> u64 {
    let mut h = NodeHasher::new();
    if let Some(u) = n.as_u64() {
        h.write(&[TAG_UINT]).write_u64(u);
    } else if let Some(i) = n.as_i64() {
        h.write(&[TAG_INT]).write(&i.to_le_bytes());
    } else {
        let f = n.as_f64().unwrap_or(f64::NAN);
        h.write(&[TAG_FLOAT]).write_u64(f.to_bits());
    }
    h.finish()
}

fn hash_str(s: &str) -> u64 {
    NodeHasher::new()
        .write(&[TAG_STRING])
        .write_u64(s.len() as u64)
        .write(s.as_bytes())
        .finish()
}
