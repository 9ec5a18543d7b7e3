//! Cryptographic envelope for evidence at rest.
//!
//! Seals plaintext evidence bytes with AES-256-GCM into a [`SealedEnvelope`]
//! carrying ciphertext, IV, authentication tag, and the key version used. The
//! additional authenticated data binds the ciphertext to its evidence id, so
//! an envelope swapped between objects fails authentication.
//!
//! `open` fails closed: any tag mismatch yields a typed integrity error and
//! never partial plaintext.

use crate::error::{CustodiaError, Result};
use crate::kms::KeyMaterial;
use crate::types::EvidenceId;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

/// AES-256-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Cipher identifier recorded in envelopes and evidence records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeAlgorithm {
    #[default]
    Aes256Gcm,
}

impl EnvelopeAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeAlgorithm::Aes256Gcm => "AES_256_GCM",
        }
    }
}

/// An encrypted evidence payload with explicit authentication material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedEnvelope {
    pub algorithm: EnvelopeAlgorithm,
    /// Ciphertext without the tag.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// Random 96-bit IV, unique per seal.
    pub iv: [u8; NONCE_LEN],
    /// GCM authentication tag.
    pub tag: [u8; TAG_LEN],
    /// Key reference in the external key-management capability.
    pub key_id: String,
    /// Key version used to seal.
    pub key_version: u32,
}

/// Additional authenticated data binding an envelope to its evidence id.
pub fn binding_context(evidence_id: &EvidenceId) -> Vec<u8> {
    format!("custodia/evidence/{}", evidence_id).into_bytes()
}

/// Seals and opens evidence envelopes.
///
/// Key material is supplied per call by the caller (fetched from the key
/// provider) and is never retained here.
pub struct EnvelopeCipher {
    rng: SystemRandom,
}

impl EnvelopeCipher {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt `plaintext` under `key`, bound to `context`.
    pub fn seal(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        key_id: &str,
        context: &[u8],
    ) -> Result<SealedEnvelope> {
        let aead_key = Self::aead_key(key)?;

        let mut iv = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| CustodiaError::Internal("Failed to generate IV".to_string()))?;

        let mut in_out = plaintext.to_vec();
        let tag = aead_key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::from(context),
                &mut in_out,
            )
            .map_err(|_| CustodiaError::Internal("Encryption failed".to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_ref());

        Ok(SealedEnvelope {
            algorithm: EnvelopeAlgorithm::Aes256Gcm,
            ciphertext: in_out,
            iv,
            tag: tag_bytes,
            key_id: key_id.to_string(),
            key_version: key.version(),
        })
    }

    /// Decrypt and authenticate an envelope. Fails closed on any mismatch of
    /// tag, IV, ciphertext, or context.
    pub fn open(
        &self,
        envelope: &SealedEnvelope,
        key: &KeyMaterial,
        context: &[u8],
    ) -> Result<Vec<u8>> {
        let aead_key = Self::aead_key(key)?;

        let mut in_out = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(&envelope.ciphertext);
        in_out.extend_from_slice(&envelope.tag);

        let plaintext = aead_key
            .open_in_place(
                Nonce::assume_unique_for_key(envelope.iv),
                Aad::from(context),
                &mut in_out,
            )
            .map_err(|_| {
                CustodiaError::Integrity("envelope authentication failed".to_string())
            })?;

        Ok(plaintext.to_vec())
    }

    fn aead_key(key: &KeyMaterial) -> Result<LessSafeKey> {
        if key.bytes().len() != AES_256_GCM.key_len() {
            return Err(CustodiaError::InvalidData(format!(
                "key length {} does not match AES-256-GCM requirement {}",
                key.bytes().len(),
                AES_256_GCM.key_len()
            )));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, key.bytes())
            .map_err(|_| CustodiaError::Internal("Invalid encryption key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> KeyMaterial {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        KeyMaterial::new(bytes, 1)
    }

    #[test]
    fn test_seal_open_round_trip() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let plaintext = b"body camera footage bytes";
        let envelope = cipher.seal(plaintext, &key, "master", &context).unwrap();

        assert_eq!(envelope.key_id, "master");
        assert_eq!(envelope.key_version, 1);
        assert_ne!(envelope.ciphertext.as_slice(), plaintext.as_slice());

        let opened = cipher.open(&envelope, &key, &context).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_ciphertext_bit_flip_detected() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let mut envelope = cipher.seal(b"evidence", &key, "k", &context).unwrap();
        envelope.ciphertext[0] ^= 0x01;

        let err = cipher.open(&envelope, &key, &context).unwrap_err();
        assert!(matches!(err, CustodiaError::Integrity(_)));
    }

    #[test]
    fn test_tag_bit_flip_detected() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let mut envelope = cipher.seal(b"evidence", &key, "k", &context).unwrap();
        envelope.tag[TAG_LEN - 1] ^= 0x80;

        let err = cipher.open(&envelope, &key, &context).unwrap_err();
        assert!(matches!(err, CustodiaError::Integrity(_)));
    }

    #[test]
    fn test_iv_bit_flip_detected() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let mut envelope = cipher.seal(b"evidence", &key, "k", &context).unwrap();
        envelope.iv[3] ^= 0x10;

        let err = cipher.open(&envelope, &key, &context).unwrap_err();
        assert!(matches!(err, CustodiaError::Integrity(_)));
    }

    #[test]
    fn test_context_binding_prevents_envelope_swap() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();

        let context_a = binding_context(&EvidenceId::new());
        let context_b = binding_context(&EvidenceId::new());

        let envelope = cipher.seal(b"evidence", &key, "k", &context_a).unwrap();

        // Opening under a different evidence id must fail authentication.
        let err = cipher.open(&envelope, &key, &context_b).unwrap_err();
        assert!(matches!(err, CustodiaError::Integrity(_)));

        assert!(cipher.open(&envelope, &key, &context_a).is_ok());
    }

    #[test]
    fn test_unique_ivs_per_seal() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let a = cipher.seal(b"same plaintext", &key, "k", &context).unwrap();
        let b = cipher.seal(b"same plaintext", &key, "k", &context).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let cipher = EnvelopeCipher::new();
        let short_key = KeyMaterial::new(vec![0u8; 16], 1);
        let context = binding_context(&EvidenceId::new());

        let err = cipher.seal(b"x", &short_key, "k", &context).unwrap_err();
        assert!(matches!(err, CustodiaError::InvalidData(_)));
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let cipher = EnvelopeCipher::new();
        let key = test_key();
        let context = binding_context(&EvidenceId::new());

        let envelope = cipher.seal(b"serialize me", &key, "k", &context).unwrap();
        let bytes = bincode::serialize(&envelope).unwrap();
        let back: SealedEnvelope = bincode::deserialize(&bytes).unwrap();

        assert_eq!(envelope, back);
        let opened = cipher.open(&back, &key, &context).unwrap();
        assert_eq!(opened, b"serialize me");
    }
}
