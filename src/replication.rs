//! Replication and integrity verification.
//!
//! Drives writes to a primary provider and mirrors them to each configured
//! replica, then proves on demand that every provider still holds the exact
//! content that was ingested.
//!
//! Per-object state machine: `PENDING_REPLICATION -> REPLICATED -> DIVERGED
//! -> RESOLVED`. Replica writes are idempotent and retried with exponential
//! backoff up to a bounded attempt count; exhausting retries leaves the
//! object `PENDING_REPLICATION` and raises an alert rather than silently
//! dropping the requirement.

use crate::config::ReplicationConfig;
use crate::error::{CustodiaError, Result};
use crate::ledger::CustodyLedger;
use crate::provider::{with_timeout, StorageProvider, WormParams};
use crate::store::EvidenceStore;
use crate::types::{
    CustodyAction, EvidenceId, ObjectMetadata, ProviderVerification, ReplicationState, StorageKey,
    VerificationRecord, VerificationReport, VerificationStatus,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Alert raised for conditions that need operator attention.
#[derive(Debug, Clone)]
pub enum IntegrityAlert {
    /// A replica write exhausted its retries; the object remains
    /// PENDING_REPLICATION until the provider recovers.
    ReplicationStalled {
        evidence_id: EvidenceId,
        provider: String,
        attempts: u32,
    },
    /// A provider attested a fingerprint that does not match the content.
    DivergenceDetected {
        evidence_id: EvidenceId,
        provider: String,
    },
    /// The custody chain failed verification.
    ChainTampered { evidence_id: EvidenceId },
}

/// Counters exposed by the replicator.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    pub replicas_succeeded: u64,
    pub replicas_failed: u64,
    pub verifications: u64,
    pub divergences_detected: u64,
}

/// Replication driver and integrity verifier.
pub struct Replicator {
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<CustodyLedger>,
    primary: Arc<dyn StorageProvider>,
    replicas: Vec<Arc<dyn StorageProvider>>,
    config: ReplicationConfig,
    provider_timeout: Duration,
    alerts: broadcast::Sender<IntegrityAlert>,
    semaphore: Arc<Semaphore>,
    replicas_succeeded: AtomicU64,
    replicas_failed: AtomicU64,
    verifications: AtomicU64,
    divergences_detected: AtomicU64,
}

impl Replicator {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<CustodyLedger>,
        primary: Arc<dyn StorageProvider>,
        replicas: Vec<Arc<dyn StorageProvider>>,
        config: ReplicationConfig,
        provider_timeout: Duration,
    ) -> Self {
        let (alerts, _) = broadcast::channel(256);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            ledger,
            primary,
            replicas,
            config,
            provider_timeout,
            alerts,
            semaphore,
            replicas_succeeded: AtomicU64::new(0),
            replicas_failed: AtomicU64::new(0),
            verifications: AtomicU64::new(0),
            divergences_detected: AtomicU64::new(0),
        }
    }

    /// Subscribe to integrity alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<IntegrityAlert> {
        self.alerts.subscribe()
    }

    /// Raise an alert on behalf of another component.
    pub fn raise(&self, alert: IntegrityAlert) {
        let _ = self.alerts.send(alert);
    }

    /// Current counters.
    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            replicas_succeeded: self.replicas_succeeded.load(Ordering::Relaxed),
            replicas_failed: self.replicas_failed.load(Ordering::Relaxed),
            verifications: self.verifications.load(Ordering::Relaxed),
            divergences_detected: self.divergences_detected.load(Ordering::Relaxed),
        }
    }

    /// Schedule replication of freshly ingested sealed bytes to every
    /// configured replica.
    ///
    /// Synchronous policy runs the mirror writes before returning; otherwise
    /// they proceed in the background and the caller's acknowledgment is not
    /// blocked.
    pub async fn replicate(
        self: Arc<Self>,
        evidence_id: EvidenceId,
        key: StorageKey,
        sealed_bytes: Vec<u8>,
        metadata: ObjectMetadata,
        worm: Option<WormParams>,
    ) -> Result<()> {
        if self.replicas.is_empty() {
            self.update_state(&evidence_id, ReplicationState::Replicated)
                .await?;
            return Ok(());
        }

        if self.config.synchronous {
            self.mirror_all(evidence_id, key, sealed_bytes, metadata, worm)
                .await;
        } else {
            tokio::spawn(async move {
                self.mirror_all(evidence_id, key, sealed_bytes, metadata, worm)
                    .await;
            });
        }
        Ok(())
    }

    async fn mirror_all(
        self: Arc<Self>,
        evidence_id: EvidenceId,
        key: StorageKey,
        sealed_bytes: Vec<u8>,
        metadata: ObjectMetadata,
        worm: Option<WormParams>,
    ) {
        let sealed_bytes = Arc::new(sealed_bytes);
        let mut handles = Vec::with_capacity(self.replicas.len());

        for replica in &self.replicas {
            let this = Arc::clone(&self);
            let replica = Arc::clone(replica);
            let key = key.clone();
            let bytes = Arc::clone(&sealed_bytes);
            let metadata = metadata.clone();
            let worm = worm.clone();
            handles.push(tokio::spawn(async move {
                let _permit = this.semaphore.acquire().await.ok();
                this.mirror_one(evidence_id, &replica, &key, &bytes, &metadata, worm.as_ref())
                    .await
            }));
        }

        let mut all_ok = true;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                _ => all_ok = false,
            }
        }

        if all_ok {
            if let Err(e) = self
                .update_state(&evidence_id, ReplicationState::Replicated)
                .await
            {
                error!(evidence_id = %evidence_id, error = %e, "Failed to record replication state");
            } else {
                debug!(evidence_id = %evidence_id, replicas = self.replicas.len(), "Replication complete");
            }
        }
    }

    /// Write one replica with bounded retries. Idempotent: a replica that
    /// already holds the object counts as success.
    async fn mirror_one(
        &self,
        evidence_id: EvidenceId,
        replica: &Arc<dyn StorageProvider>,
        key: &StorageKey,
        sealed_bytes: &[u8],
        metadata: &ObjectMetadata,
        worm: Option<&WormParams>,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = with_timeout(
                self.provider_timeout,
                replica.put(key, sealed_bytes, metadata, worm),
            )
            .await;

            match result {
                Ok(_) | Err(CustodiaError::AlreadyExists(_)) => {
                    self.replicas_succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        evidence_id = %evidence_id,
                        provider = replica.name(),
                        attempt,
                        "Replica write committed"
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(
                        evidence_id = %evidence_id,
                        provider = replica.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Replica write failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    self.replicas_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        evidence_id = %evidence_id,
                        provider = replica.name(),
                        attempts = attempt,
                        error = %e,
                        "Replica write exhausted retries"
                    );
                    self.raise(IntegrityAlert::ReplicationStalled {
                        evidence_id,
                        provider: replica.name().to_string(),
                        attempts: attempt,
                    });
                    return Err(e);
                }
            }
        }

        unreachable!("retry loop returns on success or final failure")
    }

    /// Compare fingerprints across the primary and every replica against the
    /// evidence's content fingerprint, commit the outcome (state transition
    /// plus VERIFY custody event), and return the report.
    pub async fn verify(&self, evidence_id: &EvidenceId, actor_id: &str) -> Result<VerificationReport> {
        let record = self.store.get(evidence_id).await?;
        let object = record.object;

        let providers = self
            .collect_attestations(&object.storage_key, &object.content_fingerprint, object.replication_state)
            .await;
        let status = overall_status(&providers);

        self.verifications.fetch_add(1, Ordering::Relaxed);
        if status == VerificationStatus::Invalid {
            self.divergences_detected.fetch_add(1, Ordering::Relaxed);
            for p in providers.iter().filter(|p| p.status == VerificationStatus::Invalid) {
                warn!(
                    evidence_id = %evidence_id,
                    provider = %p.provider,
                    "Fingerprint divergence detected"
                );
                self.raise(IntegrityAlert::DivergenceDetected {
                    evidence_id: *evidence_id,
                    provider: p.provider.clone(),
                });
            }
        }

        let detail = verification_detail(&providers, status);
        let primary_observed = providers
            .first()
            .and_then(|p| p.observed)
            .unwrap_or(object.content_fingerprint);

        let mut committed_state = object.replication_state;
        self.ledger
            .append_with(evidence_id, CustodyAction::Verify, actor_id, |object| {
                object.last_verification = Some(VerificationRecord {
                    timestamp: Utc::now(),
                    status,
                    verification_hash: primary_observed,
                });
                object.replication_state = next_state(object.replication_state, status);
                committed_state = object.replication_state;
                Ok(Some(detail.clone()))
            })
            .await?;

        info!(
            evidence_id = %evidence_id,
            status = ?status,
            state = ?committed_state,
            "Integrity verification committed"
        );

        Ok(VerificationReport {
            evidence_id: *evidence_id,
            checked_at: Utc::now(),
            status,
            replication_state: committed_state,
            providers,
        })
    }

    /// Re-verify a diverged object after out-of-band repair. Only a fully
    /// clean pass moves the state to RESOLVED; the engine never auto-repairs.
    pub async fn resolve_divergence(
        &self,
        evidence_id: &EvidenceId,
        actor_id: &str,
    ) -> Result<VerificationReport> {
        let record = self.store.get(evidence_id).await?;
        if record.object.replication_state != ReplicationState::Diverged {
            return Err(CustodiaError::InvalidState(format!(
                "evidence {} is not diverged",
                evidence_id
            )));
        }

        let object = record.object;
        let providers = self
            .collect_attestations(&object.storage_key, &object.content_fingerprint, object.replication_state)
            .await;
        let status = overall_status(&providers);
        self.verifications.fetch_add(1, Ordering::Relaxed);

        let resolved = status == VerificationStatus::Valid;
        let detail = if resolved {
            "divergence resolved".to_string()
        } else {
            format!("divergence persists: {}", verification_detail(&providers, status))
        };
        let primary_observed = providers
            .first()
            .and_then(|p| p.observed)
            .unwrap_or(object.content_fingerprint);

        let mut committed_state = ReplicationState::Diverged;
        self.ledger
            .append_with(evidence_id, CustodyAction::Verify, actor_id, |object| {
                object.last_verification = Some(VerificationRecord {
                    timestamp: Utc::now(),
                    status,
                    verification_hash: primary_observed,
                });
                if resolved {
                    object.replication_state = ReplicationState::Resolved;
                }
                committed_state = object.replication_state;
                Ok(Some(detail.clone()))
            })
            .await?;

        if resolved {
            info!(evidence_id = %evidence_id, "Divergence resolved");
        } else {
            warn!(evidence_id = %evidence_id, "Divergence persists after resolution attempt");
        }

        Ok(VerificationReport {
            evidence_id: *evidence_id,
            checked_at: Utc::now(),
            status,
            replication_state: committed_state,
            providers,
        })
    }

    async fn collect_attestations(
        &self,
        key: &StorageKey,
        expected: &crate::fingerprint::Digest,
        state: ReplicationState,
    ) -> Vec<ProviderVerification> {
        let mut results = Vec::with_capacity(1 + self.replicas.len());
        results.push(
            self.attest_one(self.primary.as_ref(), key, expected, state)
                .await,
        );
        for replica in &self.replicas {
            results.push(self.attest_one(replica.as_ref(), key, expected, state).await);
        }
        results
    }

    async fn attest_one(
        &self,
        provider: &dyn StorageProvider,
        key: &StorageKey,
        expected: &crate::fingerprint::Digest,
        state: ReplicationState,
    ) -> ProviderVerification {
        match with_timeout(self.provider_timeout, provider.head_fingerprint(key)).await {
            Ok(observed) => ProviderVerification {
                provider: provider.name().to_string(),
                status: if observed == *expected {
                    VerificationStatus::Valid
                } else {
                    VerificationStatus::Invalid
                },
                observed: Some(observed),
            },
            // A replica that has not been written yet is not divergence.
            Err(CustodiaError::NotFound(_)) if state == ReplicationState::PendingReplication => {
                ProviderVerification {
                    provider: provider.name().to_string(),
                    status: VerificationStatus::Unknown,
                    observed: None,
                }
            }
            Err(CustodiaError::NotFound(_)) => ProviderVerification {
                provider: provider.name().to_string(),
                status: VerificationStatus::Invalid,
                observed: None,
            },
            Err(e) => {
                debug!(provider = provider.name(), error = %e, "Provider unreachable during verification");
                ProviderVerification {
                    provider: provider.name().to_string(),
                    status: VerificationStatus::Unknown,
                    observed: None,
                }
            }
        }
    }

    /// Conditionally record a replication state transition, retrying lost
    /// races against the updated record.
    async fn update_state(&self, evidence_id: &EvidenceId, state: ReplicationState) -> Result<()> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let record = self.store.get(evidence_id).await?;
            if record.object.replication_state == state {
                return Ok(());
            }
            let mut object = record.object;
            object.replication_state = state;
            match self.store.update(evidence_id, record.revision, object).await {
                Ok(_) => return Ok(()),
                Err(CustodiaError::Conflict(_)) if attempt < max_attempts => {
                    sleep(self.config.retry.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(CustodiaError::ContentionExceeded {
            evidence_id: evidence_id.to_string(),
            attempts: max_attempts,
        })
    }
}

fn overall_status(providers: &[ProviderVerification]) -> VerificationStatus {
    if providers
        .iter()
        .any(|p| p.status == VerificationStatus::Invalid)
    {
        VerificationStatus::Invalid
    } else if providers
        .iter()
        .any(|p| p.status == VerificationStatus::Unknown)
    {
        VerificationStatus::Unknown
    } else {
        VerificationStatus::Valid
    }
}

fn next_state(current: ReplicationState, status: VerificationStatus) -> ReplicationState {
    match status {
        VerificationStatus::Invalid => ReplicationState::Diverged,
        VerificationStatus::Valid => match current {
            ReplicationState::PendingReplication | ReplicationState::Replicated => {
                ReplicationState::Replicated
            }
            // Diverged only clears through the explicit resolution path.
            other => other,
        },
        VerificationStatus::Unknown => current,
    }
}

fn verification_detail(providers: &[ProviderVerification], status: VerificationStatus) -> String {
    match status {
        VerificationStatus::Valid => "all providers match content fingerprint".to_string(),
        _ => {
            let problems: Vec<String> = providers
                .iter()
                .filter(|p| p.status != VerificationStatus::Valid)
                .map(|p| format!("{}={:?}", p.provider, p.status))
                .collect();
            problems.join(", ")
        }
    }
}
