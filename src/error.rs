//! Error types for the custodia evidence storage engine.
//!
//! This module provides a unified error type [`CustodiaError`] for all engine
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Integrity**: authentication-tag or fingerprint mismatches on read paths
//! - **Retention**: mutations attempted against locked or held evidence
//! - **Ledger**: custody-chain verification and contention failures
//! - **Provider**: storage backend availability, timeouts, capability gaps
//! - **Store**: metadata record lookup and conditional-update conflicts
//!
//! # Example
//!
//! ```rust
//! use custodia::error::{CustodiaError, Result};
//!
//! fn check_payload(bytes: &[u8]) -> Result<()> {
//!     if bytes.is_empty() {
//!         return Err(CustodiaError::InvalidData("empty evidence payload".into()));
//!     }
//!     Ok(())
//! }
//!
//! fn handle_error(err: &CustodiaError) {
//!     if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for custodia operations.
#[derive(Error, Debug)]
pub enum CustodiaError {
    // Integrity errors - fatal for the read, never retried blindly
    #[error("Integrity failure: {0}")]
    Integrity(String),

    #[error("Custody chain tampered for evidence {0}")]
    ChainTampered(String),

    // Retention errors - fatal, not retried
    #[error("Retention violation: {0}")]
    RetentionViolation(String),

    // Contention - surfaced to caller as retryable
    #[error("Contention exceeded after {attempts} attempts on evidence {evidence_id}")]
    ContentionExceeded { evidence_id: String, attempts: u32 },

    // Provider errors
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider capability gap: {0}")]
    CapabilityGap(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Metadata store errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Operation errors
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Key management error: {0}")]
    KeyManagement(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodiaError {
    /// Check if error is retryable.
    ///
    /// Cryptographic and integrity failures are never retryable; transient
    /// provider failures and conditional-update losses are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CustodiaError::ProviderUnavailable(_)
                | CustodiaError::Timeout(_)
                | CustodiaError::Conflict(_)
                | CustodiaError::ContentionExceeded { .. }
        )
    }

    /// Check if this error represents an integrity failure that must be
    /// propagated and never swallowed.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CustodiaError::Integrity(_) | CustodiaError::ChainTampered(_)
        )
    }
}

impl From<bincode::Error> for CustodiaError {
    fn from(e: bincode::Error) -> Self {
        CustodiaError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CustodiaError {
    fn from(e: serde_json::Error) -> Self {
        CustodiaError::Serialization(e.to_string())
    }
}

/// Result type alias for custodia operations.
pub type Result<T> = std::result::Result<T, CustodiaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CustodiaError::ProviderUnavailable("replica-1".into()).is_retryable());
        assert!(CustodiaError::Timeout(500).is_retryable());
        assert!(CustodiaError::Conflict("revision 3".into()).is_retryable());

        assert!(!CustodiaError::Integrity("tag mismatch".into()).is_retryable());
        assert!(!CustodiaError::RetentionViolation("LOCKED".into()).is_retryable());
        assert!(!CustodiaError::ChainTampered("ev-1".into()).is_retryable());
    }

    #[test]
    fn test_integrity_classification() {
        assert!(CustodiaError::Integrity("fingerprint mismatch".into()).is_integrity_failure());
        assert!(CustodiaError::ChainTampered("ev-1".into()).is_integrity_failure());
        assert!(!CustodiaError::NotFound("ev-1".into()).is_integrity_failure());
    }
}
