//! Storage provider adapter.
//!
//! [`StorageProvider`] gives the engine uniform put/get/head/delete operations
//! against one physical backend, abstracting provider-specific object-lock
//! semantics behind a common contract. A provider that cannot guarantee
//! immutability surfaces that as a capability gap instead of silently
//! downgrading WORM puts.
//!
//! Two adapters ship with the crate: [`MemoryProvider`] for tests and
//! single-process deployments, and [`FsProvider`] persisting sealed bytes and
//! a metadata sidecar on the local filesystem with an LRU read cache.

use crate::error::{CustodiaError, Result};
use crate::fingerprint::{fingerprint, Digest};
use crate::types::{ObjectMetadata, StorageKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// What a provider can guarantee.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Provider-native object lock: stored objects cannot be deleted or
    /// overwritten before their retain-until date.
    pub object_lock: bool,
}

/// WORM parameters passed through to provider-native object lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WormParams {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub retain_until: DateTime<Utc>,
    pub legal_hold: bool,
}

impl WormParams {
    fn blocks_delete(&self, now: DateTime<Utc>) -> bool {
        self.legal_hold || now < self.retain_until
    }
}

/// Receipt returned by a successful put.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReceipt {
    pub provider: String,
    pub key: StorageKey,
    pub size_bytes: u64,
    /// CRC32 over the stored sealed bytes.
    pub checksum: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
    /// Whether provider-native object lock was applied.
    pub worm_applied: bool,
}

/// Uniform operations against one physical storage backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider name for logging and verification reports.
    fn name(&self) -> &str;

    /// What this provider can guarantee.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Store sealed bytes under `key`. Write-once: an existing object is
    /// never overwritten. WORM params request provider-native object lock;
    /// a provider without that capability must fail the put rather than
    /// store an unprotected copy.
    async fn put(
        &self,
        key: &StorageKey,
        sealed_bytes: &[u8],
        metadata: &ObjectMetadata,
        worm: Option<&WormParams>,
    ) -> Result<ProviderReceipt>;

    /// Return the exact bytes previously stored, with their metadata. No
    /// implicit transcoding.
    async fn get(&self, key: &StorageKey) -> Result<(Vec<u8>, ObjectMetadata)>;

    /// Attest the content fingerprint for a stored object.
    ///
    /// The provider recomputes the digest of the bytes it currently holds and
    /// compares it to the digest recorded at put time. If they match, it
    /// returns the recorded content fingerprint; if not, it returns the
    /// digest of the bytes as they are now, which cannot equal any content
    /// fingerprint and so makes the corruption visible to the comparer.
    async fn head_fingerprint(&self, key: &StorageKey) -> Result<Digest>;

    /// Physically delete an object, honoring provider-native object lock.
    /// Returns false if the object did not exist.
    async fn delete(&self, key: &StorageKey) -> Result<bool>;
}

/// Bound a provider call with a caller-supplied timeout.
///
/// A timed-out call is treated as failed, never assumed complete; the caller
/// retries per its own policy.
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CustodiaError::Timeout(timeout.as_millis() as u64)),
    }
}

fn worm_gap_check(
    capabilities: ProviderCapabilities,
    worm: Option<&WormParams>,
    provider: &str,
) -> Result<()> {
    if worm.is_some() && !capabilities.object_lock {
        return Err(CustodiaError::CapabilityGap(format!(
            "provider {} cannot guarantee object immutability",
            provider
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    metadata: ObjectMetadata,
    /// Digest of the sealed bytes as stored at put time.
    stored_digest: Digest,
    worm: Option<WormParams>,
}

/// In-memory provider for tests and single-process deployments.
pub struct MemoryProvider {
    name: String,
    capabilities: ProviderCapabilities,
    objects: Arc<RwLock<HashMap<StorageKey, StoredObject>>>,
    unavailable: AtomicBool,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderCapabilities { object_lock: true },
            objects: Arc::new(RwLock::new(HashMap::new())),
            unavailable: AtomicBool::new(false),
        }
    }

    /// A provider without object-lock support, for capability-gap tests.
    pub fn without_object_lock(name: impl Into<String>) -> Self {
        Self {
            capabilities: ProviderCapabilities { object_lock: false },
            ..Self::new(name)
        }
    }

    /// Simulate the backend becoming unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Replace stored bytes out-of-band, leaving the recorded digest intact.
    /// Models silent backend corruption for verification tests.
    pub async fn corrupt(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| CustodiaError::NotFound(format!("object {}", key)))?;
        object.bytes = bytes;
        Ok(())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CustodiaError::ProviderUnavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn put(
        &self,
        key: &StorageKey,
        sealed_bytes: &[u8],
        metadata: &ObjectMetadata,
        worm: Option<&WormParams>,
    ) -> Result<ProviderReceipt> {
        self.check_available()?;
        worm_gap_check(self.capabilities, worm, &self.name)?;

        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(CustodiaError::AlreadyExists(format!("object {}", key)));
        }

        objects.insert(
            key.clone(),
            StoredObject {
                bytes: sealed_bytes.to_vec(),
                metadata: metadata.clone(),
                stored_digest: fingerprint(sealed_bytes),
                worm: worm.cloned(),
            },
        );

        Ok(ProviderReceipt {
            provider: self.name.clone(),
            key: key.clone(),
            size_bytes: sealed_bytes.len() as u64,
            checksum: crc32fast::hash(sealed_bytes),
            stored_at: Utc::now(),
            worm_applied: worm.is_some(),
        })
    }

    async fn get(&self, key: &StorageKey) -> Result<(Vec<u8>, ObjectMetadata)> {
        self.check_available()?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| CustodiaError::NotFound(format!("object {}", key)))?;
        Ok((object.bytes.clone(), object.metadata.clone()))
    }

    async fn head_fingerprint(&self, key: &StorageKey) -> Result<Digest> {
        self.check_available()?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| CustodiaError::NotFound(format!("object {}", key)))?;

        let current = fingerprint(&object.bytes);
        if current == object.stored_digest {
            Ok(object.metadata.content_fingerprint)
        } else {
            Ok(current)
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool> {
        self.check_available()?;
        let mut objects = self.objects.write().await;
        let Some(object) = objects.get(key) else {
            return Ok(false);
        };

        if let Some(worm) = &object.worm {
            if worm.blocks_delete(Utc::now()) {
                return Err(CustodiaError::RetentionViolation(format!(
                    "object {} is under provider object lock",
                    key
                )));
            }
        }

        objects.remove(key);
        Ok(true)
    }
}

/// Sidecar record persisted next to the sealed bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsObjectRecord {
    metadata: ObjectMetadata,
    stored_digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    worm: Option<WormParams>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    stored_at: DateTime<Utc>,
}

/// Filesystem-backed provider.
///
/// Sealed bytes land at `<root>/<key>.bin` with a JSON sidecar at
/// `<root>/<key>.meta.json`; the hierarchical storage key doubles as the
/// directory layout. Reads go through an LRU cache; head and delete always
/// hit the disk.
pub struct FsProvider {
    name: String,
    root: PathBuf,
    cache: Mutex<LruCache<StorageKey, Arc<Vec<u8>>>>,
}

impl FsProvider {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let cache_entries = NonZeroUsize::new(1024).expect("1024 is non-zero");
        Ok(Self {
            name: name.into(),
            root,
            cache: Mutex::new(LruCache::new(cache_entries)),
        })
    }

    fn data_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!("{}.bin", key.as_str()))
    }

    fn meta_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!("{}.meta.json", key.as_str()))
    }

    async fn read_record(&self, key: &StorageKey) -> Result<FsObjectRecord> {
        let raw = tokio::fs::read(self.meta_path(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CustodiaError::NotFound(format!("object {}", key))
            } else {
                CustodiaError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl StorageProvider for FsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { object_lock: true }
    }

    async fn put(
        &self,
        key: &StorageKey,
        sealed_bytes: &[u8],
        metadata: &ObjectMetadata,
        worm: Option<&WormParams>,
    ) -> Result<ProviderReceipt> {
        worm_gap_check(self.capabilities(), worm, &self.name)?;

        let data_path = self.data_path(key);
        if tokio::fs::try_exists(&data_path).await? {
            return Err(CustodiaError::AlreadyExists(format!("object {}", key)));
        }
        if let Some(parent) = data_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let record = FsObjectRecord {
            metadata: metadata.clone(),
            stored_digest: fingerprint(sealed_bytes),
            worm: worm.cloned(),
            stored_at: Utc::now(),
        };

        tokio::fs::write(&data_path, sealed_bytes).await?;
        tokio::fs::write(self.meta_path(key), serde_json::to_vec_pretty(&record)?).await?;

        debug!(provider = %self.name, key = %key, size = sealed_bytes.len(), "Stored object");

        Ok(ProviderReceipt {
            provider: self.name.clone(),
            key: key.clone(),
            size_bytes: sealed_bytes.len() as u64,
            checksum: crc32fast::hash(sealed_bytes),
            stored_at: record.stored_at,
            worm_applied: worm.is_some(),
        })
    }

    async fn get(&self, key: &StorageKey) -> Result<(Vec<u8>, ObjectMetadata)> {
        let record = self.read_record(key).await?;

        if let Some(cached) = self.cache.lock().get(key).cloned() {
            return Ok((cached.as_ref().clone(), record.metadata));
        }

        let bytes = tokio::fs::read(self.data_path(key)).await?;
        self.cache.lock().put(key.clone(), Arc::new(bytes.clone()));
        Ok((bytes, record.metadata))
    }

    async fn head_fingerprint(&self, key: &StorageKey) -> Result<Digest> {
        let record = self.read_record(key).await?;
        let bytes = tokio::fs::read(self.data_path(key)).await?;

        let current = fingerprint(&bytes);
        if current == record.stored_digest {
            Ok(record.metadata.content_fingerprint)
        } else {
            Ok(current)
        }
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool> {
        let record = match self.read_record(key).await {
            Ok(record) => record,
            Err(CustodiaError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Some(worm) = &record.worm {
            if worm.blocks_delete(Utc::now()) {
                return Err(CustodiaError::RetentionViolation(format!(
                    "object {} is under provider object lock",
                    key
                )));
            }
        }

        tokio::fs::remove_file(self.data_path(key)).await?;
        tokio::fs::remove_file(self.meta_path(key)).await?;
        self.cache.lock().pop(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseId, EvidenceId};
    use chrono::Duration as ChronoDuration;

    fn sample_put() -> (StorageKey, Vec<u8>, ObjectMetadata) {
        let evidence_id = EvidenceId::new();
        let case_id = CaseId::new();
        let sealed = b"sealed evidence bytes".to_vec();
        let content_fp = fingerprint(b"plaintext evidence");
        let key = StorageKey::derive(&case_id, &evidence_id, &content_fp);
        let metadata = ObjectMetadata {
            schema_version: ObjectMetadata::SCHEMA_VERSION,
            evidence_id,
            case_id,
            mime_type: "video/mp4".to_string(),
            size_bytes: 18,
            content_fingerprint: content_fp,
        };
        (key, sealed, metadata)
    }

    fn future_worm() -> WormParams {
        WormParams {
            retain_until: Utc::now() + ChronoDuration::days(365),
            legal_hold: false,
        }
    }

    #[tokio::test]
    async fn test_memory_put_get_round_trip() {
        let provider = MemoryProvider::new("primary");
        let (key, sealed, metadata) = sample_put();

        let receipt = provider.put(&key, &sealed, &metadata, None).await.unwrap();
        assert_eq!(receipt.size_bytes, sealed.len() as u64);
        assert_eq!(receipt.checksum, crc32fast::hash(&sealed));
        assert!(!receipt.worm_applied);

        let (bytes, meta) = provider.get(&key).await.unwrap();
        assert_eq!(bytes, sealed);
        assert_eq!(meta, metadata);
    }

    #[tokio::test]
    async fn test_memory_write_once() {
        let provider = MemoryProvider::new("primary");
        let (key, sealed, metadata) = sample_put();

        provider.put(&key, &sealed, &metadata, None).await.unwrap();
        let err = provider.put(&key, &sealed, &metadata, None).await.unwrap_err();
        assert!(matches!(err, CustodiaError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_capability_gap_surfaced() {
        let provider = MemoryProvider::without_object_lock("basic");
        let (key, sealed, metadata) = sample_put();

        let err = provider
            .put(&key, &sealed, &metadata, Some(&future_worm()))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::CapabilityGap(_)));

        // Without WORM the put is accepted.
        provider.put(&key, &sealed, &metadata, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_head_fingerprint_attests_content() {
        let provider = MemoryProvider::new("primary");
        let (key, sealed, metadata) = sample_put();
        provider.put(&key, &sealed, &metadata, None).await.unwrap();

        let attested = provider.head_fingerprint(&key).await.unwrap();
        assert_eq!(attested, metadata.content_fingerprint);
    }

    #[tokio::test]
    async fn test_head_fingerprint_exposes_corruption() {
        let provider = MemoryProvider::new("replica-1");
        let (key, sealed, metadata) = sample_put();
        provider.put(&key, &sealed, &metadata, None).await.unwrap();

        provider.corrupt(&key, b"tampered bytes".to_vec()).await.unwrap();

        let attested = provider.head_fingerprint(&key).await.unwrap();
        assert_ne!(attested, metadata.content_fingerprint);
    }

    #[tokio::test]
    async fn test_memory_delete_honors_object_lock() {
        let provider = MemoryProvider::new("primary");
        let (key, sealed, metadata) = sample_put();
        provider
            .put(&key, &sealed, &metadata, Some(&future_worm()))
            .await
            .unwrap();

        let err = provider.delete(&key).await.unwrap_err();
        assert!(matches!(err, CustodiaError::RetentionViolation(_)));

        // Expired lock allows deletion.
        let (key2, sealed2, metadata2) = sample_put();
        let expired = WormParams {
            retain_until: Utc::now() - ChronoDuration::days(1),
            legal_hold: false,
        };
        provider
            .put(&key2, &sealed2, &metadata2, Some(&expired))
            .await
            .unwrap();
        assert!(provider.delete(&key2).await.unwrap());
        assert!(!provider.delete(&key2).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_unavailable() {
        let provider = MemoryProvider::new("replica-1");
        let (key, sealed, metadata) = sample_put();
        provider.put(&key, &sealed, &metadata, None).await.unwrap();

        provider.set_unavailable(true);
        let err = provider.head_fingerprint(&key).await.unwrap_err();
        assert!(matches!(err, CustodiaError::ProviderUnavailable(_)));
        assert!(err.is_retryable());

        provider.set_unavailable(false);
        provider.head_fingerprint(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result.unwrap_err(), CustodiaError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fs_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new("primary", dir.path().join("objects")).unwrap();
        let (key, sealed, metadata) = sample_put();

        provider
            .put(&key, &sealed, &metadata, Some(&future_worm()))
            .await
            .unwrap();

        let (bytes, meta) = provider.get(&key).await.unwrap();
        assert_eq!(bytes, sealed);
        assert_eq!(meta, metadata);

        // Cached read returns the same bytes.
        let (bytes_again, _) = provider.get(&key).await.unwrap();
        assert_eq!(bytes_again, sealed);
    }

    #[tokio::test]
    async fn test_fs_delete_honors_object_lock() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new("primary", dir.path().join("objects")).unwrap();
        let (key, sealed, metadata) = sample_put();

        provider
            .put(&key, &sealed, &metadata, Some(&future_worm()))
            .await
            .unwrap();

        let err = provider.delete(&key).await.unwrap_err();
        assert!(matches!(err, CustodiaError::RetentionViolation(_)));
    }

    #[tokio::test]
    async fn test_fs_head_detects_on_disk_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new("replica-1", dir.path().join("objects")).unwrap();
        let (key, sealed, metadata) = sample_put();
        provider.put(&key, &sealed, &metadata, None).await.unwrap();

        assert_eq!(
            provider.head_fingerprint(&key).await.unwrap(),
            metadata.content_fingerprint
        );

        // Flip bytes on disk behind the provider's back.
        let data_path = dir.path().join("objects").join(format!("{}.bin", key.as_str()));
        let mut bytes = std::fs::read(&data_path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&data_path, bytes).unwrap();

        assert_ne!(
            provider.head_fingerprint(&key).await.unwrap(),
            metadata.content_fingerprint
        );
    }
}
