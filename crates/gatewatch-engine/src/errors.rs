//! Engine error taxonomy.
//!
//! A policy rejection is data (`Outcome::Rejected`), not an error;
//! errors here mean the engine could not reach a decision at all.

use thiserror::Error;

use gatewatch_store::StoreError;

/// Errors surfaced by the admission pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage failure underneath the pipeline.
    #[error("store error: {0}")]
    Store(StoreError),

    /// The event failed structural validation and was not admitted.
    #[error("invalid event: {0}")]
    Validation(String),

    /// A retriable failure; the caller should resubmit the batch.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => Self::Transient(msg),
            other => Self::Store(other),
        }
    }
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
