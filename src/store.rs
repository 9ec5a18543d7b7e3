//! Evidence metadata store.
//!
//! [`EvidenceStore`] is the durable record store for [`EvidenceObject`]s,
//! including the custody ledger. It is the only shared mutable resource in
//! the engine: every mutation goes through revision-conditional updates, so
//! concurrent writers coordinate through optimistic concurrency rather than
//! in-process locks.

use crate::error::{CustodiaError, Result};
use crate::types::{EvidenceId, EvidenceObject};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An evidence record paired with its store revision.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Monotonic revision, bumped by every committed update.
    pub revision: u64,
    pub object: EvidenceObject,
}

/// Durable record store with conditional updates keyed by evidence id.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    /// Returns the initial revision.
    async fn insert(&self, object: EvidenceObject) -> Result<u64>;

    /// Fetch a record with its current revision.
    async fn get(&self, id: &EvidenceId) -> Result<VersionedRecord>;

    /// Replace a record only if its revision still equals
    /// `expected_revision`. A losing writer receives `Conflict` and must
    /// re-read before retrying. Returns the new revision.
    async fn update(
        &self,
        id: &EvidenceId,
        expected_revision: u64,
        object: EvidenceObject,
    ) -> Result<u64>;

    /// Remove a record conditionally on its revision.
    async fn remove(&self, id: &EvidenceId, expected_revision: u64) -> Result<()>;

    /// All evidence ids currently stored.
    async fn list_ids(&self) -> Result<Vec<EvidenceId>>;
}

/// In-memory reference implementation.
///
/// Backs tests and single-node deployments; the conditional-update contract
/// matches what a document store with optimistic concurrency provides.
pub struct MemoryEvidenceStore {
    records: Arc<RwLock<HashMap<EvidenceId, VersionedRecord>>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryEvidenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn insert(&self, object: EvidenceObject) -> Result<u64> {
        let mut records = self.records.write().await;
        if records.contains_key(&object.id) {
            return Err(CustodiaError::AlreadyExists(format!(
                "evidence {}",
                object.id
            )));
        }

        let id = object.id;
        records.insert(
            id,
            VersionedRecord {
                revision: 1,
                object,
            },
        );
        Ok(1)
    }

    async fn get(&self, id: &EvidenceId) -> Result<VersionedRecord> {
        let records = self.records.read().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| CustodiaError::NotFound(format!("evidence {}", id)))
    }

    async fn update(
        &self,
        id: &EvidenceId,
        expected_revision: u64,
        object: EvidenceObject,
    ) -> Result<u64> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| CustodiaError::NotFound(format!("evidence {}", id)))?;

        if record.revision != expected_revision {
            return Err(CustodiaError::Conflict(format!(
                "evidence {} at revision {}, expected {}",
                id, record.revision, expected_revision
            )));
        }

        record.revision += 1;
        record.object = object;
        Ok(record.revision)
    }

    async fn remove(&self, id: &EvidenceId, expected_revision: u64) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get(id)
            .ok_or_else(|| CustodiaError::NotFound(format!("evidence {}", id)))?;

        if record.revision != expected_revision {
            return Err(CustodiaError::Conflict(format!(
                "evidence {} at revision {}, expected {}",
                id, record.revision, expected_revision
            )));
        }

        records.remove(id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<EvidenceId>> {
        let records = self.records.read().await;
        Ok(records.keys().copied().collect())
    }
}
