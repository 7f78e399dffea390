//! Content-integrity digest for artifact bodies.
//!
//! Artifacts are keyed by caller-chosen id (see the artifact store), not by
//! content hash, but every artifact still carries a `ContentDigest` over its
//! `content` and `code` fields so writers and checkpoint/restore can detect
//! silent corruption. Grounded in `echo-cas`'s blake3-keyed blob store.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(#[serde(with = "hex_string")] [u8; 32]);

impl ContentDigest {
    pub fn compute(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

mod hex {
    pub fn encode(bytes: [u8; 32]) -> String {
        let mut out = String::with_capacity(64);
        for b in bytes {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

mod hex_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::hex::encode(*bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() != 64 {
            return Err(serde::de::Error::custom("content digest must be 32 bytes hex"));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let byte_str = std::str::from_utf8(chunk).map_err(serde::de::Error::custom)?;
            out[i] = u8::from_str_radix(byte_str, 16).map_err(serde::de::Error::custom)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentDigest::compute(&[b"hello", b"world"]);
        let b = ContentDigest::compute(&[b"hello", b"world"]);
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = ContentDigest::compute(&[b"hello"]);
        let b = ContentDigest::compute(&[b"goodbye"]);
        assert_ne!(a, b);
    }

    #[test]
    fn json_roundtrip() {
        let digest = ContentDigest::compute(&[b"roundtrip"]);
        let json = serde_json::to_string(&digest).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, back);
    }
}
