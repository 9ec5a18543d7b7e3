//! The evidence engine facade.
//!
//! [`EvidenceEngine`] composes the retention policy engine, content
//! fingerprint, cryptographic envelope, storage providers, replicator, and
//! custody ledger behind the operations exposed to case and evidence
//! services. The upload path is an explicit pipeline - assign retention,
//! fingerprint, seal, primary put, schedule replication, append the UPLOAD
//! custody event - with each stage producing a new value rather than mutating
//! shared state in place.
//!
//! All dependencies are injected at construction; the engine owns no ambient
//! global state.

use crate::config::CustodiaConfig;
use crate::envelope::{binding_context, EnvelopeCipher, SealedEnvelope};
use crate::error::{CustodiaError, Result};
use crate::fingerprint::fingerprint;
use crate::kms::KeyProvider;
use crate::ledger::CustodyLedger;
use crate::provider::{with_timeout, StorageProvider, WormParams};
use crate::replication::{IntegrityAlert, ReplicationStats, Replicator};
use crate::retention::RetentionEngine;
use crate::store::EvidenceStore;
use crate::types::{
    CaseId, CustodyAction, CustodyEvent, EncryptionMetadata, EvidenceId, EvidenceObject,
    ObjectMetadata, ReplicationState, StorageKey, StorageTier, VerificationRecord,
    VerificationReport, VerificationStatus,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Parameters for one evidence upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub case_id: CaseId,
    pub mime_type: String,
    /// Initial storage tier hint.
    pub tier: StorageTier,
    pub actor_id: String,
    /// Retention class name; `None` uses the configured default.
    pub retention_class: Option<String>,
}

/// Cooperative cancellation for an in-flight upload.
///
/// Cancellation is honored only before the primary put commits; once the
/// sealed bytes are durable the object exists and follows the normal
/// lifecycle.
#[derive(Clone, Default)]
pub struct UploadCancellation(Arc<AtomicBool>);

impl UploadCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The evidence storage and chain-of-custody engine.
pub struct EvidenceEngine {
    config: CustodiaConfig,
    store: Arc<dyn EvidenceStore>,
    key_provider: Arc<dyn KeyProvider>,
    primary: Arc<dyn StorageProvider>,
    replicas: Vec<Arc<dyn StorageProvider>>,
    ledger: Arc<CustodyLedger>,
    retention: RetentionEngine,
    replicator: Arc<Replicator>,
    cipher: EnvelopeCipher,
    /// Key reference in the external key-management capability.
    key_id: String,
}

impl EvidenceEngine {
    pub fn new(
        config: CustodiaConfig,
        store: Arc<dyn EvidenceStore>,
        key_provider: Arc<dyn KeyProvider>,
        primary: Arc<dyn StorageProvider>,
        replicas: Vec<Arc<dyn StorageProvider>>,
        key_id: impl Into<String>,
    ) -> Self {
        let ledger = Arc::new(CustodyLedger::new(store.clone(), config.ledger.clone()));
        let retention = RetentionEngine::new(store.clone(), ledger.clone());
        let replicator = Arc::new(Replicator::new(
            store.clone(),
            ledger.clone(),
            primary.clone(),
            replicas.clone(),
            config.replication.clone(),
            config.provider_timeout,
        ));

        Self {
            config,
            store,
            key_provider,
            primary,
            replicas,
            ledger,
            retention,
            replicator,
            cipher: EnvelopeCipher::new(),
            key_id: key_id.into(),
        }
    }

    /// The retention policy engine.
    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// The custody ledger.
    pub fn ledger(&self) -> &CustodyLedger {
        &self.ledger
    }

    /// Subscribe to integrity alerts.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<IntegrityAlert> {
        self.replicator.subscribe()
    }

    /// Replication counters.
    pub fn replication_stats(&self) -> ReplicationStats {
        self.replicator.stats()
    }

    /// Ingest evidence bytes.
    pub async fn upload_evidence(
        &self,
        request: UploadRequest,
        bytes: &[u8],
    ) -> Result<EvidenceObject> {
        self.upload_evidence_cancellable(request, bytes, &UploadCancellation::new())
            .await
    }

    /// Ingest evidence bytes with cooperative cancellation.
    pub async fn upload_evidence_cancellable(
        &self,
        request: UploadRequest,
        bytes: &[u8],
        cancellation: &UploadCancellation,
    ) -> Result<EvidenceObject> {
        let class = self
            .config
            .retention_class(request.retention_class.as_deref())
            .cloned()
            .ok_or_else(|| {
                CustodiaError::Config(format!(
                    "unknown retention class {:?}",
                    request.retention_class
                ))
            })?;

        let now = Utc::now();
        let evidence_id = EvidenceId::new();
        let content_fingerprint = fingerprint(bytes);
        let retention = self.retention.assign_retention(request.tier, &class, now);
        let storage_key = StorageKey::derive(&request.case_id, &evidence_id, &content_fingerprint);

        let envelope = {
            let key = self.key_provider.fetch_key(&self.key_id, None).await?;
            // Key material drops (and is wiped) as soon as sealing finishes.
            self.cipher
                .seal(bytes, &key, &self.key_id, &binding_context(&evidence_id))?
        };
        let sealed_blob = bincode::serialize(&envelope)?;

        let metadata = ObjectMetadata {
            schema_version: ObjectMetadata::SCHEMA_VERSION,
            evidence_id,
            case_id: request.case_id,
            mime_type: request.mime_type.clone(),
            size_bytes: bytes.len() as u64,
            content_fingerprint,
        };
        let worm = WormParams {
            retain_until: retention.computed_retention_deadline,
            legal_hold: false,
        };

        // Last cancellation point: after this the primary put commits and the
        // object cannot be un-uploaded.
        if cancellation.is_cancelled() {
            info!(evidence_id = %evidence_id, "Upload cancelled before primary commit");
            return Err(CustodiaError::Cancelled(format!(
                "upload of evidence {} cancelled before primary commit",
                evidence_id
            )));
        }

        with_timeout(
            self.config.provider_timeout,
            self.primary.put(&storage_key, &sealed_blob, &metadata, Some(&worm)),
        )
        .await?;

        let object = EvidenceObject {
            id: evidence_id,
            case_id: request.case_id,
            storage_key: storage_key.clone(),
            size_bytes: bytes.len() as u64,
            mime_type: request.mime_type.clone(),
            content_fingerprint,
            storage_tier: request.tier,
            encryption: EncryptionMetadata {
                algorithm: envelope.algorithm.as_str().to_string(),
                key_id: envelope.key_id.clone(),
                key_version: envelope.key_version,
                iv: envelope.iv.to_vec(),
            },
            retention,
            custody_chain: Vec::new(),
            last_verification: None,
            replication_state: ReplicationState::PendingReplication,
            created_at: now,
        };
        self.store.insert(object).await?;

        self.ledger
            .append(
                &evidence_id,
                CustodyAction::Upload,
                &request.actor_id,
                Some(format!(
                    "ingested {} bytes, class {}",
                    bytes.len(),
                    class.name
                )),
            )
            .await?;

        Arc::clone(&self.replicator)
            .replicate(evidence_id, storage_key, sealed_blob, metadata, Some(worm))
            .await?;

        info!(
            evidence_id = %evidence_id,
            case_id = %request.case_id,
            size_bytes = bytes.len(),
            tier = %request.tier,
            "Evidence ingested"
        );

        Ok(self.store.get(&evidence_id).await?.object)
    }

    /// Read evidence back: fetch from the primary, open the envelope, and
    /// re-fingerprint the plaintext before returning it.
    ///
    /// Any integrity failure appends a VERIFY custody event capturing the
    /// failure and propagates as a typed error; partial plaintext is never
    /// returned.
    pub async fn download_evidence(&self, evidence_id: &EvidenceId, actor_id: &str) -> Result<Vec<u8>> {
        let record = self.store.get(evidence_id).await?;
        let object = record.object;

        let (sealed_blob, _metadata) = with_timeout(
            self.config.provider_timeout,
            self.primary.get(&object.storage_key),
        )
        .await?;
        let envelope: SealedEnvelope = bincode::deserialize(&sealed_blob)?;

        let plaintext = {
            let key = self
                .key_provider
                .fetch_key(&envelope.key_id, Some(envelope.key_version))
                .await?;
            match self
                .cipher
                .open(&envelope, &key, &binding_context(evidence_id))
            {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    self.record_read_failure(evidence_id, actor_id, "envelope authentication failed")
                        .await;
                    return Err(e);
                }
            }
        };

        let recomputed = fingerprint(&plaintext);
        if recomputed != object.content_fingerprint {
            self.record_read_failure(evidence_id, actor_id, "plaintext fingerprint mismatch")
                .await;
            return Err(CustodiaError::Integrity(format!(
                "fingerprint mismatch for evidence {}: expected {}, got {}",
                evidence_id, object.content_fingerprint, recomputed
            )));
        }

        self.ledger
            .append(evidence_id, CustodyAction::Access, actor_id, None)
            .await?;

        Ok(plaintext)
    }

    /// Preserve an audit trail of a failed read before the error propagates.
    async fn record_read_failure(&self, evidence_id: &EvidenceId, actor_id: &str, reason: &str) {
        error!(evidence_id = %evidence_id, reason, "Integrity failure during download");
        let append = self
            .ledger
            .append_with(evidence_id, CustodyAction::Verify, actor_id, |object| {
                object.last_verification = Some(VerificationRecord {
                    timestamp: Utc::now(),
                    status: VerificationStatus::Invalid,
                    verification_hash: object.content_fingerprint,
                });
                Ok(Some(reason.to_string()))
            })
            .await;
        if let Err(e) = append {
            warn!(evidence_id = %evidence_id, error = %e, "Failed to record read failure");
        }
    }

    /// Move evidence forward to a colder tier. Tier regressions are rejected
    /// and each transition appends exactly one custody event.
    pub async fn transition_tier(
        &self,
        evidence_id: &EvidenceId,
        new_tier: StorageTier,
        actor_id: &str,
    ) -> Result<EvidenceObject> {
        self.ledger
            .append_with(evidence_id, CustodyAction::TierTransition, actor_id, |object| {
                if !object.storage_tier.can_transition_to(new_tier) {
                    return Err(CustodiaError::InvalidOperation(format!(
                        "tier transition {} -> {} is not monotonic",
                        object.storage_tier, new_tier
                    )));
                }
                let detail = format!("{}->{}", object.storage_tier, new_tier);
                object.storage_tier = new_tier;
                Ok(Some(detail))
            })
            .await?;

        info!(evidence_id = %evidence_id, tier = %new_tier, "Tier transition committed");
        Ok(self.store.get(evidence_id).await?.object)
    }

    /// Verify the custody chain and the fingerprints held by every provider.
    pub async fn verify_integrity(
        &self,
        evidence_id: &EvidenceId,
        actor_id: &str,
    ) -> Result<VerificationReport> {
        if !self.ledger.verify_chain(evidence_id).await? {
            error!(evidence_id = %evidence_id, "Custody chain verification failed");
            self.replicator.raise(IntegrityAlert::ChainTampered {
                evidence_id: *evidence_id,
            });
            return Err(CustodiaError::ChainTampered(evidence_id.to_string()));
        }

        self.replicator.verify(evidence_id, actor_id).await
    }

    /// Re-verify a diverged object after out-of-band repair.
    pub async fn resolve_divergence(
        &self,
        evidence_id: &EvidenceId,
        actor_id: &str,
    ) -> Result<VerificationReport> {
        self.replicator.resolve_divergence(evidence_id, actor_id).await
    }

    /// The full custody chain for an evidence id.
    pub async fn get_custody_chain(&self, evidence_id: &EvidenceId) -> Result<Vec<CustodyEvent>> {
        Ok(self.store.get(evidence_id).await?.object.custody_chain)
    }

    /// Delete evidence if retention policy permits.
    ///
    /// The retention check runs first; a locked or held object is denied
    /// without contacting any backend.
    pub async fn delete_evidence(&self, evidence_id: &EvidenceId, actor_id: &str) -> Result<bool> {
        let record = self.store.get(evidence_id).await?;
        self.retention
            .check_mutation_allowed(&record.object, Utc::now())
            .into_result(evidence_id)?;

        let key = &record.object.storage_key;
        with_timeout(self.config.provider_timeout, self.primary.delete(key)).await?;
        for replica in &self.replicas {
            match with_timeout(self.config.provider_timeout, replica.delete(key)).await {
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        evidence_id = %evidence_id,
                        provider = replica.name(),
                        error = %e,
                        "Replica deletion failed"
                    );
                    return Err(e);
                }
            }
        }

        self.store.remove(evidence_id, record.revision).await?;
        info!(evidence_id = %evidence_id, actor_id, "Evidence deleted after retention expiry");
        Ok(true)
    }

    /// Toggle the legal hold by authorized override.
    pub async fn set_legal_hold(
        &self,
        evidence_id: &EvidenceId,
        held: bool,
        actor_id: &str,
    ) -> Result<()> {
        self.retention.set_legal_hold(evidence_id, held, actor_id).await
    }

    /// Evaluate the WORM lock for one evidence id.
    pub async fn evaluate_retention(&self, evidence_id: &EvidenceId) -> Result<bool> {
        self.retention.evaluate_lock(evidence_id, Utc::now()).await
    }

    /// Evaluate the WORM lock across all stored evidence.
    pub async fn evaluate_retention_sweep(&self) -> Result<u32> {
        self.retention.evaluate_sweep(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::LocalKeyProvider;
    use crate::provider::MemoryProvider;
    use crate::store::MemoryEvidenceStore;

    async fn engine() -> (EvidenceEngine, Arc<MemoryEvidenceStore>, Arc<MemoryProvider>) {
        let mut config = CustodiaConfig::development();
        config.replication.synchronous = true;

        let store = Arc::new(MemoryEvidenceStore::new());
        let primary = Arc::new(MemoryProvider::new("primary"));
        let key_provider = Arc::new(LocalKeyProvider::new());
        key_provider.generate("evidence-master").await.unwrap();

        let engine = EvidenceEngine::new(
            config,
            store.clone(),
            key_provider,
            primary.clone() as Arc<dyn StorageProvider>,
            vec![Arc::new(MemoryProvider::new("replica-1")) as Arc<dyn StorageProvider>],
            "evidence-master",
        );
        (engine, store, primary)
    }

    fn request() -> UploadRequest {
        UploadRequest {
            case_id: CaseId::new(),
            mime_type: "video/mp4".to_string(),
            tier: StorageTier::Hot,
            actor_id: "officer-1".to_string(),
            retention_class: None,
        }
    }

    #[tokio::test]
    async fn test_upload_creates_record_and_upload_event() {
        let (engine, _store, primary) = engine().await;

        let object = engine.upload_evidence(request(), b"dashcam bytes").await.unwrap();

        assert!(!object.retention.lock_status);
        assert_eq!(object.custody_chain.len(), 1);
        assert_eq!(object.custody_chain[0].action, CustodyAction::Upload);
        assert_eq!(object.content_fingerprint, fingerprint(b"dashcam bytes"));
        assert_eq!(object.replication_state, ReplicationState::Replicated);

        // Primary holds sealed bytes, not plaintext.
        let (sealed, _) = primary.get(&object.storage_key).await.unwrap();
        assert_ne!(sealed.as_slice(), b"dashcam bytes".as_slice());
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let (engine, _store, _primary) = engine().await;

        let object = engine.upload_evidence(request(), b"interview audio").await.unwrap();
        let bytes = engine.download_evidence(&object.id, "analyst-2").await.unwrap();
        assert_eq!(bytes, b"interview audio");

        let chain = engine.get_custody_chain(&object.id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].action, CustodyAction::Access);
        assert_eq!(chain[1].actor_id, "analyst-2");
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_nothing() {
        let (engine, store, _primary) = engine().await;

        let cancellation = UploadCancellation::new();
        cancellation.cancel();

        let err = engine
            .upload_evidence_cancellable(request(), b"cancelled bytes", &cancellation)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::Cancelled(_)));
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_retention_class_rejected() {
        let (engine, _store, _primary) = engine().await;

        let mut req = request();
        req.retention_class = Some("nonexistent".to_string());

        let err = engine.upload_evidence(req, b"bytes").await.unwrap_err();
        assert!(matches!(err, CustodiaError::Config(_)));
    }

    #[tokio::test]
    async fn test_delete_denied_before_deadline() {
        let (engine, _store, _primary) = engine().await;

        let object = engine.upload_evidence(request(), b"held bytes").await.unwrap();
        let err = engine.delete_evidence(&object.id, "officer-1").await.unwrap_err();
        assert!(matches!(err, CustodiaError::RetentionViolation(_)));
    }

    #[tokio::test]
    async fn test_tier_transitions_monotonic() {
        let (engine, _store, _primary) = engine().await;
        let object = engine.upload_evidence(request(), b"tiered bytes").await.unwrap();

        let warm = engine
            .transition_tier(&object.id, StorageTier::Warm, "archivist")
            .await
            .unwrap();
        assert_eq!(warm.storage_tier, StorageTier::Warm);

        let cold = engine
            .transition_tier(&object.id, StorageTier::Cold, "archivist")
            .await
            .unwrap();
        assert_eq!(cold.storage_tier, StorageTier::Cold);

        let err = engine
            .transition_tier(&object.id, StorageTier::Hot, "archivist")
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::InvalidOperation(_)));

        let chain = engine.get_custody_chain(&object.id).await.unwrap();
        let transitions = chain
            .iter()
            .filter(|e| e.action == CustodyAction::TierTransition)
            .count();
        assert_eq!(transitions, 2);
    }
}
