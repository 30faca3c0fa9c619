//! SQLite connection pooling.
//!
//! Every connection is initialized with WAL journaling, foreign keys,
//! and a busy timeout so concurrent writers queue instead of failing
//! immediately.

use std::path::Path;
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool configuration.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pooled connections.
    pub max_size: u32,
    /// SQLite busy timeout per connection.
    pub busy_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

fn init_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}

/// Open a pooled database at `path`.
pub fn new_pool(path: &Path, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let busy_timeout = config.busy_timeout;
    let manager =
        SqliteConnectionManager::file(path).with_init(move |c| init_connection(c, busy_timeout));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    Ok(pool)
}

/// Open a pooled in-memory database (shared across the pool's
/// connections via a shared cache URI). Test and tooling use.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    // Each in-memory pool needs a unique name or pools would share state
    // across tests in one process.
    let name = format!(
        "file:gw_mem_{}?mode=memory&cache=shared",
        uuid::Uuid::now_v7().simple()
    );
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(&name)
        .with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )
        .with_init(move |c| init_connection(c, busy_timeout));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
