//! Sync error taxonomy.
//!
//! Nothing here crosses the admission path as a panic: the loop logs,
//! backs off on source failures, and keeps running.

use thiserror::Error;

/// Errors surfaced by the sync loop and consistency monitor.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The pull source could not be reached or returned garbage. The
    /// loop backs off and retries.
    #[error("source error: {0}")]
    Source(String),

    /// Admission failed underneath the loop.
    #[error(transparent)]
    Engine(#[from] gatewatch_engine::EngineError),

    /// Storage failed underneath the loop.
    #[error(transparent)]
    Store(#[from] gatewatch_store::StoreError),

    /// A background store task died before producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Sync result alias.
pub type Result<T> = std::result::Result<T, SyncError>;
