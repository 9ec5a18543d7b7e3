//! Core type definitions for the custodia evidence storage engine.
//!
//! This module contains the data model shared by every component: evidence
//! identifiers, the [`EvidenceObject`] record, custody ledger entries, and the
//! retention, replication, and verification state carried on each record.
//!
//! # Canonical serialization
//!
//! Field names in serialized records are camelCase and timestamps are UTC
//! epoch milliseconds; any store or wire representation of an
//! [`EvidenceObject`] uses exactly these names.
//!
//! # Key Types
//!
//! - [`EvidenceId`] / [`CaseId`]: UUID-based identifiers
//! - [`EvidenceObject`]: the record of one stored artifact
//! - [`CustodyEvent`]: one append-only, hash-chained ledger entry
//! - [`StorageTier`]: HOT/WARM/COLD, forward-only transitions
//! - [`ReplicationState`]: per-object replication state machine

use crate::fingerprint::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an evidence object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceId(pub Uuid);

impl EvidenceId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for EvidenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a case grouping evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage tier reflecting access frequency and cost.
///
/// Tiers order HOT < WARM < COLD and transitions are monotonic: an object may
/// only move toward colder tiers, never back.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageTier {
    /// Hot tier - frequent access, fastest retrieval.
    #[default]
    Hot,
    /// Warm tier - occasional access.
    Warm,
    /// Cold tier - archival, infrequent access.
    Cold,
}

impl StorageTier {
    /// Next tier in demotion order.
    pub fn demote(&self) -> Option<StorageTier> {
        match self {
            StorageTier::Hot => Some(StorageTier::Warm),
            StorageTier::Warm => Some(StorageTier::Cold),
            StorageTier::Cold => None,
        }
    }

    /// Whether a transition to `target` is allowed (strictly forward).
    pub fn can_transition_to(&self, target: StorageTier) -> bool {
        target > *self
    }

    /// Canonical name as it appears in serialized records.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "HOT",
            StorageTier::Warm => "WARM",
            StorageTier::Cold => "COLD",
        }
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action recorded by a custody ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyAction {
    /// Initial ingestion. Must be the first entry for any evidence id.
    Upload,
    /// Plaintext was read back by a caller.
    Access,
    /// Storage tier moved forward.
    TierTransition,
    /// WORM lock flipped on.
    RetentionLock,
    /// Integrity verification ran (success or failure).
    Verify,
    /// Legal hold toggled by authorized override.
    LegalHold,
}

impl CustodyAction {
    /// Canonical name used in entry signatures.
    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyAction::Upload => "UPLOAD",
            CustodyAction::Access => "ACCESS",
            CustodyAction::TierTransition => "TIER_TRANSITION",
            CustodyAction::RetentionLock => "RETENTION_LOCK",
            CustodyAction::Verify => "VERIFY",
            CustodyAction::LegalHold => "LEGAL_HOLD",
        }
    }

    /// Whether this action may still be appended once the WORM lock is set.
    ///
    /// Locked evidence accepts only reads, verifications, and the authorized
    /// legal-hold override; everything else is a retention violation.
    pub fn allowed_after_lock(&self) -> bool {
        matches!(
            self,
            CustodyAction::Access | CustodyAction::Verify | CustodyAction::LegalHold
        )
    }
}

impl std::fmt::Display for CustodyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only custody ledger entry.
///
/// Each entry is cryptographically bound to its predecessor through
/// `precedingEntryHash` and carries a signature over the event fields and the
/// evidence's content fingerprint at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustodyEvent {
    /// When the event occurred (UTC, millisecond precision).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Who performed the action.
    pub actor_id: String,
    /// What happened.
    pub action: CustodyAction,
    /// Signature of the immediately preceding entry, or the genesis constant
    /// for the first entry.
    pub preceding_entry_hash: Digest,
    /// Digest over {action, timestamp, actorId, precedingEntryHash,
    /// currentContentFingerprint}.
    pub entry_signature: Digest,
    /// Optional human-readable context (tier names, mismatch descriptions).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

/// Encryption parameters recorded at ingestion. Immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    /// Cipher identifier, e.g. `AES_256_GCM`.
    pub algorithm: String,
    /// Key reference in the external key-management capability.
    pub key_id: String,
    /// Key version used to seal this object.
    pub key_version: u32,
    /// Per-object random IV.
    #[serde(with = "serde_bytes")]
    pub iv: Vec<u8>,
}

/// WORM retention state for one evidence object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRecord {
    /// Policy-defined retention period in days.
    pub retention_period_days: u32,
    /// Ingestion time plus the retention period.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub computed_retention_deadline: DateTime<Utc>,
    /// WORM lock. Transitions false -> true exactly once, never back.
    pub lock_status: bool,
    /// Legal hold override. May toggle independently of the lock.
    pub legal_hold: bool,
}

impl RetentionRecord {
    /// Whether the retention deadline has passed at `now`.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now >= self.computed_retention_deadline
    }
}

/// Outcome of a single verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Every reachable provider returned the expected fingerprint.
    Valid,
    /// At least one provider returned a mismatching fingerprint.
    Invalid,
    /// One or more providers could not be reached; no mismatch observed.
    Unknown,
}

/// Result of the most recent verification, stored on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub status: VerificationStatus,
    /// The digest observed at the primary during this pass.
    pub verification_hash: Digest,
}

/// Replication state machine per evidence object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationState {
    /// Primary write committed; one or more replicas still outstanding.
    PendingReplication,
    /// All configured replicas hold the object.
    Replicated,
    /// A provider returned a mismatching fingerprint. Terminal alert state
    /// until explicitly resolved.
    Diverged,
    /// Divergence was repaired out-of-band and re-verified clean.
    Resolved,
}

/// Per-provider outcome within a [`VerificationReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderVerification {
    /// Provider name.
    pub provider: String,
    pub status: VerificationStatus,
    /// Digest the provider attested, when reachable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub observed: Option<Digest>,
}

/// Report returned by `verify_integrity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub evidence_id: EvidenceId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub checked_at: DateTime<Utc>,
    /// Worst status across all providers.
    pub status: VerificationStatus,
    /// Replication state after this pass committed.
    pub replication_state: ReplicationState,
    pub providers: Vec<ProviderVerification>,
}

/// Deterministic storage key for sealed evidence bytes.
///
/// Derived once from case, evidence id, and content fingerprint; immutable
/// after assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive the canonical key for an evidence object.
    pub fn derive(case_id: &CaseId, evidence_id: &EvidenceId, fingerprint: &Digest) -> Self {
        Self(format!(
            "cases/{}/evidence/{}/{}",
            case_id,
            evidence_id,
            fingerprint.to_hex()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive metadata stored alongside sealed bytes at each provider.
///
/// The schema is closed: unknown fields are rejected on deserialization so the
/// fingerprint and signature scopes stay well-defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObjectMetadata {
    /// Metadata schema version.
    pub schema_version: u32,
    pub evidence_id: EvidenceId,
    pub case_id: CaseId,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Plaintext content fingerprint, for cross-provider comparison.
    pub content_fingerprint: Digest,
}

impl ObjectMetadata {
    /// Current metadata schema version.
    pub const SCHEMA_VERSION: u32 = 1;
}

/// The record of one stored evidence artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceObject {
    /// Opaque unique identifier, assigned at ingestion. Immutable.
    pub id: EvidenceId,
    /// Case this evidence belongs to. Immutable.
    pub case_id: CaseId,
    /// Deterministic storage key. Immutable once assigned.
    pub storage_key: StorageKey,
    /// Plaintext size in bytes. Set once at ingestion.
    pub size_bytes: u64,
    /// Declared media type. Set once at ingestion.
    pub mime_type: String,
    /// Digest of plaintext content. Immutable.
    pub content_fingerprint: Digest,
    /// Current storage tier. Mutable forward only.
    pub storage_tier: StorageTier,
    /// Encryption parameters. Immutable.
    pub encryption: EncryptionMetadata,
    /// WORM retention state.
    pub retention: RetentionRecord,
    /// Append-only custody ledger.
    pub custody_chain: Vec<CustodyEvent>,
    /// Most recent verification outcome, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_verification: Option<VerificationRecord>,
    /// Replication state machine position.
    pub replication_state: ReplicationState,
    /// Ingestion time (UTC, millisecond precision).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    #[test]
    fn test_tier_ordering() {
        assert!(StorageTier::Hot.can_transition_to(StorageTier::Warm));
        assert!(StorageTier::Hot.can_transition_to(StorageTier::Cold));
        assert!(StorageTier::Warm.can_transition_to(StorageTier::Cold));

        assert!(!StorageTier::Cold.can_transition_to(StorageTier::Hot));
        assert!(!StorageTier::Cold.can_transition_to(StorageTier::Warm));
        assert!(!StorageTier::Warm.can_transition_to(StorageTier::Hot));
        assert!(!StorageTier::Hot.can_transition_to(StorageTier::Hot));
    }

    #[test]
    fn test_tier_demotion_chain() {
        assert_eq!(StorageTier::Hot.demote(), Some(StorageTier::Warm));
        assert_eq!(StorageTier::Warm.demote(), Some(StorageTier::Cold));
        assert_eq!(StorageTier::Cold.demote(), None);
    }

    #[test]
    fn test_actions_after_lock() {
        assert!(CustodyAction::Access.allowed_after_lock());
        assert!(CustodyAction::Verify.allowed_after_lock());
        assert!(CustodyAction::LegalHold.allowed_after_lock());

        assert!(!CustodyAction::Upload.allowed_after_lock());
        assert!(!CustodyAction::TierTransition.allowed_after_lock());
        assert!(!CustodyAction::RetentionLock.allowed_after_lock());
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let case = CaseId::new();
        let id = EvidenceId::new();
        let fp = fingerprint(b"payload");

        let a = StorageKey::derive(&case, &id, &fp);
        let b = StorageKey::derive(&case, &id, &fp);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("cases/"));
        assert!(a.as_str().contains(&fp.to_hex()));
    }

    #[test]
    fn test_metadata_rejects_unknown_fields() {
        let json = format!(
            r#"{{"schemaVersion":1,"evidenceId":"{}","caseId":"{}","mimeType":"video/mp4",
                "sizeBytes":10,"contentFingerprint":"{}","extraField":true}}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            fingerprint(b"x").to_hex()
        );
        let parsed: std::result::Result<ObjectMetadata, _> = serde_json::from_str(&json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_canonical_field_names() {
        let record = RetentionRecord {
            retention_period_days: 365,
            computed_retention_deadline: Utc::now(),
            lock_status: false,
            legal_hold: true,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("retentionPeriodDays"));
        assert!(json.contains("computedRetentionDeadline"));
        assert!(json.contains("lockStatus"));
        assert!(json.contains("legalHold"));
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(serde_json::to_string(&StorageTier::Hot).unwrap(), "\"HOT\"");
        assert_eq!(
            serde_json::to_string(&ReplicationState::PendingReplication).unwrap(),
            "\"PENDING_REPLICATION\""
        );
        assert_eq!(
            serde_json::to_string(&CustodyAction::TierTransition).unwrap(),
            "\"TIER_TRANSITION\""
        );
    }
}
