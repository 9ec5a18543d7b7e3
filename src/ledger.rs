//! Append-only, hash-chained custody ledger.
//!
//! Every custody event is bound to its predecessor through
//! `precedingEntryHash` and signed over its own fields plus the evidence's
//! content fingerprint, making the chain tamper-evident: editing or removing
//! any entry breaks every link after it.
//!
//! Appends are serialized per evidence id through the store's conditional
//! updates: the read-modify-write of "fetch last entry, compute next hash,
//! write new entry" commits only if no other writer got there first. Losing
//! writers retry with backoff against the updated state and fail with
//! `ContentionExceeded` once the configured attempt bound is exhausted.

use crate::config::LedgerConfig;
use crate::error::{CustodiaError, Result};
use crate::fingerprint::{digest_payload, Digest};
use crate::store::EvidenceStore;
use crate::types::{CustodyAction, CustodyEvent, EvidenceId, EvidenceObject};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Preceding-entry hash for the first entry of every chain.
pub fn genesis_hash() -> Digest {
    digest_payload(b"custodia/custody-ledger/genesis/v1")
}

/// Compute the signature for a custody event.
///
/// The payload is a length-prefixed canonical encoding of
/// `{action, timestamp, actorId, precedingEntryHash, contentFingerprint}`;
/// it never includes mutable record fields, so the signature scope stays
/// closed.
pub fn sign_event(
    action: CustodyAction,
    timestamp: DateTime<Utc>,
    actor_id: &str,
    preceding: &Digest,
    content_fingerprint: &Digest,
) -> Digest {
    let action_bytes = action.as_str().as_bytes();
    let actor_bytes = actor_id.as_bytes();

    let mut payload =
        Vec::with_capacity(4 + action_bytes.len() + 8 + 4 + actor_bytes.len() + 32 + 32);
    payload.extend_from_slice(&(action_bytes.len() as u32).to_be_bytes());
    payload.extend_from_slice(action_bytes);
    payload.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    payload.extend_from_slice(&(actor_bytes.len() as u32).to_be_bytes());
    payload.extend_from_slice(actor_bytes);
    payload.extend_from_slice(preceding.as_bytes());
    payload.extend_from_slice(content_fingerprint.as_bytes());

    digest_payload(&payload)
}

/// Walk a chain from genesis, recomputing every link and signature.
///
/// Returns false if any entry's preceding hash does not match its
/// predecessor's signature, any signature fails to recompute, or the chain
/// does not begin with UPLOAD.
pub fn verify_object_chain(object: &EvidenceObject) -> bool {
    let mut expected_preceding = genesis_hash();

    for (index, event) in object.custody_chain.iter().enumerate() {
        if index == 0 && event.action != CustodyAction::Upload {
            return false;
        }

        if event.preceding_entry_hash != expected_preceding {
            return false;
        }

        let recomputed = sign_event(
            event.action,
            event.timestamp,
            &event.actor_id,
            &event.preceding_entry_hash,
            &object.content_fingerprint,
        );
        if recomputed != event.entry_signature {
            return false;
        }

        expected_preceding = event.entry_signature;
    }

    true
}

/// The custody ledger: sole mutation path for evidence records.
pub struct CustodyLedger {
    store: Arc<dyn EvidenceStore>,
    config: LedgerConfig,
}

impl CustodyLedger {
    pub fn new(store: Arc<dyn EvidenceStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Append a custody event for an existing evidence id.
    pub async fn append(
        &self,
        evidence_id: &EvidenceId,
        action: CustodyAction,
        actor_id: &str,
        detail: Option<String>,
    ) -> Result<CustodyEvent> {
        self.append_with(evidence_id, action, actor_id, |_| Ok(detail.clone()))
            .await
    }

    /// Append a custody event while applying `mutate` to the record in the
    /// same conditional commit.
    ///
    /// `mutate` runs against a fresh copy of the record on every attempt and
    /// may return a detail string for the event; returning an error aborts
    /// the append without committing anything. This is how every mutating
    /// operation appends exactly one custody event: the record change and its
    /// ledger entry land in one store update.
    pub async fn append_with<F>(
        &self,
        evidence_id: &EvidenceId,
        action: CustodyAction,
        actor_id: &str,
        mut mutate: F,
    ) -> Result<CustodyEvent>
    where
        F: FnMut(&mut EvidenceObject) -> Result<Option<String>> + Send,
    {
        let max_attempts = self.config.max_append_attempts.max(1);

        for attempt in 1..=max_attempts {
            let record = self.store.get(evidence_id).await?;
            let mut object = record.object;
            let was_locked = object.retention.lock_status;

            let detail = mutate(&mut object)?;

            if object.custody_chain.is_empty() && action != CustodyAction::Upload {
                return Err(CustodiaError::InvalidOperation(format!(
                    "first custody event for evidence {} must be UPLOAD",
                    evidence_id
                )));
            }
            if !object.custody_chain.is_empty() && action == CustodyAction::Upload {
                return Err(CustodiaError::InvalidOperation(format!(
                    "evidence {} already has an UPLOAD event",
                    evidence_id
                )));
            }
            if was_locked && !action.allowed_after_lock() {
                return Err(CustodiaError::RetentionViolation(format!(
                    "LOCKED: {} not permitted on locked evidence {}",
                    action, evidence_id
                )));
            }

            let preceding = object
                .custody_chain
                .last()
                .map(|e| e.entry_signature)
                .unwrap_or_else(genesis_hash);
            let timestamp = Utc::now();
            let entry_signature = sign_event(
                action,
                timestamp,
                actor_id,
                &preceding,
                &object.content_fingerprint,
            );

            let event = CustodyEvent {
                timestamp,
                actor_id: actor_id.to_string(),
                action,
                preceding_entry_hash: preceding,
                entry_signature,
                detail,
            };
            object.custody_chain.push(event.clone());

            match self.store.update(evidence_id, record.revision, object).await {
                Ok(_) => {
                    debug!(
                        evidence_id = %evidence_id,
                        action = %action,
                        actor_id,
                        attempt,
                        "Appended custody event"
                    );
                    return Ok(event);
                }
                Err(CustodiaError::Conflict(_)) if attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    debug!(
                        evidence_id = %evidence_id,
                        action = %action,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Lost append race, retrying against updated chain"
                    );
                    sleep(delay).await;
                }
                Err(CustodiaError::Conflict(_)) => {
                    warn!(
                        evidence_id = %evidence_id,
                        action = %action,
                        attempts = max_attempts,
                        "Custody append contention exhausted"
                    );
                    return Err(CustodiaError::ContentionExceeded {
                        evidence_id: evidence_id.to_string(),
                        attempts: max_attempts,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(CustodiaError::ContentionExceeded {
            evidence_id: evidence_id.to_string(),
            attempts: max_attempts,
        })
    }

    /// Verify the chain for an evidence id. `Ok(false)` means tampered.
    pub async fn verify_chain(&self, evidence_id: &EvidenceId) -> Result<bool> {
        let record = self.store.get(evidence_id).await?;
        Ok(verify_object_chain(&record.object))
    }

    /// Verify the chain, surfacing tampering as a typed error.
    pub async fn ensure_chain(&self, evidence_id: &EvidenceId) -> Result<()> {
        if self.verify_chain(evidence_id).await? {
            Ok(())
        } else {
            Err(CustodiaError::ChainTampered(evidence_id.to_string()))
        }
    }
}
