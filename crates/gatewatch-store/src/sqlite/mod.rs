//! SQLite backing: pooled connections, migrations, row types, and
//! per-table repositories.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_in_memory, new_pool};
pub use migrations::run_migrations;
