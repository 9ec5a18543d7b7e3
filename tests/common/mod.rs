//! Common test utilities for integration tests.

use custodia::config::CustodiaConfig;
use custodia::engine::EvidenceEngine;
use custodia::kms::LocalKeyProvider;
use custodia::provider::{FsProvider, MemoryProvider, StorageProvider};
use custodia::store::MemoryEvidenceStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Key id registered in every test environment.
pub const TEST_KEY_ID: &str = "evidence-master";

/// Test environment that manages temporary directories and engine wiring.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Arc<MemoryEvidenceStore>,
    pub primary: Arc<MemoryProvider>,
    pub replicas: Vec<Arc<MemoryProvider>>,
    pub engine: EvidenceEngine,
}

impl TestEnv {
    /// Engine with in-memory providers and synchronous replication, so tests
    /// observe replication outcomes deterministically.
    pub async fn new(replica_count: usize) -> Self {
        Self::with_config(replica_count, {
            let mut config = CustodiaConfig::development();
            config.replication.synchronous = true;
            // Headroom for tests that append from many tasks at once.
            config.ledger.max_append_attempts = 10;
            config
        })
        .await
    }

    pub async fn with_config(replica_count: usize, config: CustodiaConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(MemoryEvidenceStore::new());
        let primary = Arc::new(MemoryProvider::new("primary"));
        let replicas: Vec<Arc<MemoryProvider>> = (0..replica_count)
            .map(|i| Arc::new(MemoryProvider::new(format!("replica-{}", i + 1))))
            .collect();

        let key_provider = Arc::new(LocalKeyProvider::new());
        key_provider
            .generate(TEST_KEY_ID)
            .await
            .expect("Failed to generate test key");

        let engine = EvidenceEngine::new(
            config,
            store.clone(),
            key_provider,
            primary.clone() as Arc<dyn StorageProvider>,
            replicas
                .iter()
                .map(|r| Arc::clone(r) as Arc<dyn StorageProvider>)
                .collect(),
            TEST_KEY_ID,
        );

        Self {
            temp_dir,
            store,
            primary,
            replicas,
            engine,
        }
    }

    /// Directory for filesystem-provider tests.
    pub fn fs_root(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// A filesystem provider rooted under the temp directory.
    pub fn fs_provider(&self, name: &str) -> FsProvider {
        FsProvider::new(name, self.fs_root(name)).expect("Failed to create fs provider")
    }
}

/// Deterministic pseudo-random payload of the given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}
