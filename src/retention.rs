//! WORM retention policy engine.
//!
//! Computes retention deadlines at ingestion, gates every mutating operation
//! against lock and legal-hold state, and flips the irreversible WORM lock
//! once the deadline passes. The lock transition uses the same
//! conditional-update discipline as every other record mutation, so any
//! number of concurrent sweep workers commit exactly one flip and exactly one
//! RETENTION_LOCK custody event.

use crate::config::RetentionClassPolicy;
use crate::error::{CustodiaError, Result};
use crate::ledger::CustodyLedger;
use crate::store::EvidenceStore;
use crate::types::{CustodyAction, EvidenceId, EvidenceObject, RetentionRecord, StorageTier};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Actor recorded on engine-initiated custody events.
pub const SYSTEM_ACTOR: &str = "system";

/// Why a mutation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// WORM lock is set.
    Locked,
    /// Legal hold is in place.
    LegalHold,
    /// Retention deadline has not yet passed.
    RetentionActive,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Locked => "LOCKED",
            DenialReason::LegalHold => "LEGAL_HOLD",
            DenialReason::RetentionActive => "RETENTION_ACTIVE",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a mutation-permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationDecision {
    Allowed,
    Denied(DenialReason),
}

impl MutationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, MutationDecision::Allowed)
    }

    /// Convert a denial into the typed error surfaced to callers.
    pub fn into_result(self, evidence_id: &EvidenceId) -> Result<()> {
        match self {
            MutationDecision::Allowed => Ok(()),
            MutationDecision::Denied(reason) => Err(CustodiaError::RetentionViolation(format!(
                "{}: evidence {}",
                reason, evidence_id
            ))),
        }
    }
}

/// Retention policy engine.
pub struct RetentionEngine {
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<CustodyLedger>,
}

impl RetentionEngine {
    pub fn new(store: Arc<dyn EvidenceStore>, ledger: Arc<CustodyLedger>) -> Self {
        Self { store, ledger }
    }

    /// Compute the retention record for a new evidence object.
    ///
    /// The tier window is advisory tiering metadata; the WORM period from the
    /// class policy is the binding constraint.
    pub fn assign_retention(
        &self,
        tier: StorageTier,
        class: &RetentionClassPolicy,
        now: DateTime<Utc>,
    ) -> RetentionRecord {
        let deadline = now + Duration::days(i64::from(class.retention_days));
        debug!(
            class = %class.name,
            tier = %tier,
            retention_days = class.retention_days,
            "Assigned retention"
        );

        RetentionRecord {
            retention_period_days: class.retention_days,
            computed_retention_deadline: deadline,
            lock_status: false,
            legal_hold: false,
        }
    }

    /// Decide whether a destructive operation (delete, content change) is
    /// permitted on this evidence right now.
    pub fn check_mutation_allowed(
        &self,
        evidence: &EvidenceObject,
        now: DateTime<Utc>,
    ) -> MutationDecision {
        if evidence.retention.legal_hold {
            return MutationDecision::Denied(DenialReason::LegalHold);
        }
        if evidence.retention.lock_status {
            return MutationDecision::Denied(DenialReason::Locked);
        }
        if !evidence.retention.deadline_passed(now) {
            return MutationDecision::Denied(DenialReason::RetentionActive);
        }
        MutationDecision::Allowed
    }

    /// Flip the WORM lock if the retention deadline has passed.
    ///
    /// Idempotent and safe to run concurrently from any number of workers:
    /// the flip and its RETENTION_LOCK custody event commit in a single
    /// conditional update, and an already-locked record is left untouched.
    /// Returns whether this call committed the flip.
    pub async fn evaluate_lock(&self, evidence_id: &EvidenceId, now: DateTime<Utc>) -> Result<bool> {
        let record = self.store.get(evidence_id).await?;
        if record.object.retention.lock_status
            || !record.object.retention.deadline_passed(now)
        {
            return Ok(false);
        }

        let result = self
            .ledger
            .append_with(evidence_id, CustodyAction::RetentionLock, SYSTEM_ACTOR, |object| {
                if object.retention.lock_status {
                    return Err(CustodiaError::InvalidState("already locked".into()));
                }
                if !object.retention.deadline_passed(now) {
                    return Err(CustodiaError::InvalidState("deadline not reached".into()));
                }
                object.retention.lock_status = true;
                Ok(Some(format!(
                    "retention deadline {} reached",
                    object.retention.computed_retention_deadline.to_rfc3339()
                )))
            })
            .await;

        match result {
            Ok(_) => {
                info!(evidence_id = %evidence_id, "WORM lock set");
                Ok(true)
            }
            // Another worker committed the flip between our read and write.
            Err(CustodiaError::InvalidState(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run `evaluate_lock` across all stored evidence. Returns how many locks
    /// were committed by this sweep.
    pub async fn evaluate_sweep(&self, now: DateTime<Utc>) -> Result<u32> {
        let mut flipped = 0;
        for id in self.store.list_ids().await? {
            if self.evaluate_lock(&id, now).await? {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    /// Toggle the legal hold by authorized override, recording the change in
    /// the custody chain. Permitted before and after the WORM lock.
    pub async fn set_legal_hold(
        &self,
        evidence_id: &EvidenceId,
        held: bool,
        actor_id: &str,
    ) -> Result<()> {
        self.ledger
            .append_with(evidence_id, CustodyAction::LegalHold, actor_id, |object| {
                if object.retention.legal_hold == held {
                    return Err(CustodiaError::InvalidOperation(format!(
                        "legal hold already {}",
                        if held { "placed" } else { "released" }
                    )));
                }
                object.retention.legal_hold = held;
                Ok(Some(
                    if held { "placed" } else { "released" }.to_string(),
                ))
            })
            .await?;

        info!(evidence_id = %evidence_id, held, actor_id, "Legal hold changed");
        Ok(())
    }
}
