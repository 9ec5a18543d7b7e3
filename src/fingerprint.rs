//! Content fingerprinting for evidence integrity.
//!
//! A fingerprint is a SHA-256 digest computed over the plaintext evidence
//! bytes before sealing, and recomputed over the opened plaintext during
//! verification. It is deterministic, platform-independent, and never
//! computed over ciphertext.

use crate::error::{CustodiaError, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// A 256-bit content digest.
///
/// Serialized as a lowercase hex string so digests are comparable across any
/// serialized representation of the evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| CustodiaError::InvalidData(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CustodiaError::InvalidData(format!(
                "digest must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = Digest;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a 64-character hex digest")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Digest, E> {
                Digest::from_hex(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// Compute the content fingerprint of the given bytes.
pub fn fingerprint(bytes: &[u8]) -> Digest {
    Digest(Sha256::digest(bytes).into())
}

/// Compute a digest over an already-assembled canonical byte payload.
///
/// Used by the custody ledger to sign entries; kept separate from
/// [`fingerprint`] so content digests and entry signatures never share scope.
pub fn digest_payload(payload: &[u8]) -> Digest {
    Digest(Sha256::digest(payload).into())
}
