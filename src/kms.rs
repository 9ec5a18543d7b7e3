//! Key management capability contract.
//!
//! The engine never manages raw keys. It consumes a narrow [`KeyProvider`]
//! interface backed by an external KMS/HSM; key material is fetched per
//! operation and wiped from memory as soon as the caller drops it.

use crate::error::{CustodiaError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw key bytes plus the version that produced them.
///
/// Zeroed on drop so plaintext key material never outlives its use.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    version: u32,
}

impl KeyMaterial {
    /// Wrap fetched key bytes.
    pub fn new(bytes: Vec<u8>, version: u32) -> Self {
        Self { bytes, version }
    }

    /// The raw key bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Abstract key-management capability.
///
/// Implementations front an external KMS; the engine calls `fetch_key` per
/// seal/open operation and never persists what it receives.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Fetch key material for `key_id`. `version` of `None` means the
    /// current version; sealed envelopes record the version they used so
    /// `open` can fetch the matching material after rotation.
    async fn fetch_key(&self, key_id: &str, version: Option<u32>) -> Result<KeyMaterial>;

    /// Current active version for `key_id`.
    async fn current_version(&self, key_id: &str) -> Result<u32>;
}

/// In-process key provider for development and testing.
///
/// Generates random 256-bit keys and keeps every version so rotation does not
/// orphan previously sealed envelopes.
pub struct LocalKeyProvider {
    /// key_id -> versions (1-based index order).
    keys: Arc<RwLock<HashMap<String, Vec<Vec<u8>>>>>,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new key id with a random first version.
    pub async fn generate(&self, key_id: impl Into<String>) -> Result<()> {
        let key_id = key_id.into();
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key_id) {
            return Err(CustodiaError::AlreadyExists(format!("key {}", key_id)));
        }

        keys.insert(key_id.clone(), vec![Self::random_key()]);
        info!(key_id = %key_id, "Generated encryption key");
        Ok(())
    }

    /// Add a new version for an existing key id.
    pub async fn rotate(&self, key_id: &str) -> Result<u32> {
        let mut keys = self.keys.write().await;
        let versions = keys
            .get_mut(key_id)
            .ok_or_else(|| CustodiaError::NotFound(format!("key {}", key_id)))?;

        versions.push(Self::random_key());
        let version = versions.len() as u32;
        info!(key_id = %key_id, version, "Rotated encryption key");
        Ok(version)
    }

    fn random_key() -> Vec<u8> {
        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

impl Default for LocalKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch_key(&self, key_id: &str, version: Option<u32>) -> Result<KeyMaterial> {
        let keys = self.keys.read().await;
        let versions = keys
            .get(key_id)
            .ok_or_else(|| CustodiaError::KeyManagement(format!("unknown key {}", key_id)))?;

        let version = version.unwrap_or(versions.len() as u32);
        let index = version
            .checked_sub(1)
            .map(|i| i as usize)
            .filter(|i| *i < versions.len())
            .ok_or_else(|| {
                CustodiaError::KeyManagement(format!(
                    "unknown version {} for key {}",
                    version, key_id
                ))
            })?;

        Ok(KeyMaterial::new(versions[index].clone(), version))
    }

    async fn current_version(&self, key_id: &str) -> Result<u32> {
        let keys = self.keys.read().await;
        keys.get(key_id)
            .map(|v| v.len() as u32)
            .ok_or_else(|| CustodiaError::KeyManagement(format!("unknown key {}", key_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_and_fetch() {
        let provider = LocalKeyProvider::new();
        provider.generate("evidence-master").await.unwrap();

        let key = provider.fetch_key("evidence-master", None).await.unwrap();
        assert_eq!(key.bytes().len(), 32);
        assert_eq!(key.version(), 1);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_versions() {
        let provider = LocalKeyProvider::new();
        provider.generate("k").await.unwrap();

        let v1 = provider.fetch_key("k", Some(1)).await.unwrap();
        let v2_num = provider.rotate("k").await.unwrap();
        assert_eq!(v2_num, 2);

        let v1_again = provider.fetch_key("k", Some(1)).await.unwrap();
        let v2 = provider.fetch_key("k", None).await.unwrap();

        assert_eq!(v1.bytes(), v1_again.bytes());
        assert_ne!(v1.bytes(), v2.bytes());
        assert_eq!(provider.current_version("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_fails() {
        let provider = LocalKeyProvider::new();
        assert!(provider.fetch_key("missing", None).await.is_err());
        assert!(provider.fetch_key("missing", Some(7)).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_generate_rejected() {
        let provider = LocalKeyProvider::new();
        provider.generate("k").await.unwrap();
        assert!(provider.generate("k").await.is_err());
    }
}
