//! Durable SQLite-backed storage for admission records, subjects,
//! devices, and sync checkpoints.
//!
//! Layering follows a repository pattern: stateless per-table repos
//! over raw connections, wrapped by [`AdmissionStore`] which owns the
//! pool, the write lock, and transaction boundaries.

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use sqlite::repositories::{EnrichUpdate, InsertOutcome, NewAdmission};
pub use sqlite::row_types::{AdmissionRow, CheckpointRow, DeviceRow, SubjectRow};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_in_memory, new_pool, run_migrations};
pub use store::AdmissionStore;
