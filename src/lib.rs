//! Custodia - secure evidence storage with chain-of-custody integrity.
//!
//! Custodia durably persists digital evidence under Write-Once-Read-Many
//! (WORM) retention guarantees, encrypts it at rest, replicates it across
//! independent storage providers, and proves on demand that stored content
//! has not been altered since ingestion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EvidenceEngine                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Policy: Retention Engine | Custody Ledger | Fingerprint    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Crypto: Envelope (AES-256-GCM) | Key Provider (external)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Durability: Primary Provider | Replicas | Verifier         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Records: Evidence Store (conditional updates)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Uploads flow through an explicit pipeline: retention assignment, content
//! fingerprinting, envelope sealing, the primary write, replication
//! scheduling, and the first custody ledger entry. Reads reverse the envelope
//! step after an integrity check. Every mutating operation appends exactly
//! one custody event through the store's conditional-update path.
//!
//! # Quick Start
//!
//! ```no_run
//! use custodia::config::CustodiaConfig;
//! use custodia::engine::{EvidenceEngine, UploadRequest};
//! use custodia::kms::LocalKeyProvider;
//! use custodia::provider::{MemoryProvider, StorageProvider};
//! use custodia::store::MemoryEvidenceStore;
//! use custodia::types::{CaseId, StorageTier};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> custodia::Result<()> {
//!     let keys = Arc::new(LocalKeyProvider::new());
//!     keys.generate("evidence-master").await?;
//!
//!     let engine = EvidenceEngine::new(
//!         CustodiaConfig::development(),
//!         Arc::new(MemoryEvidenceStore::new()),
//!         keys,
//!         Arc::new(MemoryProvider::new("primary")) as Arc<dyn StorageProvider>,
//!         vec![Arc::new(MemoryProvider::new("replica-1")) as Arc<dyn StorageProvider>],
//!         "evidence-master",
//!     );
//!
//!     let object = engine
//!         .upload_evidence(
//!             UploadRequest {
//!                 case_id: CaseId::new(),
//!                 mime_type: "video/mp4".into(),
//!                 tier: StorageTier::Hot,
//!                 actor_id: "officer-1".into(),
//!                 retention_class: None,
//!             },
//!             b"body camera footage",
//!         )
//!         .await?;
//!
//!     let report = engine.verify_integrity(&object.id, "auditor-1").await?;
//!     println!("verification: {:?}", report.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod engine;
pub mod envelope;
pub mod fingerprint;
pub mod kms;
pub mod ledger;
pub mod provider;
pub mod replication;
pub mod retention;
pub mod store;

pub use error::{CustodiaError, Result};
pub use types::{EvidenceId, EvidenceObject};
