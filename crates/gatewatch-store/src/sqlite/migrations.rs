//! Schema migrations, versioned with `PRAGMA user_version`.
//!
//! Each migration runs in its own transaction; `run_migrations` is
//! idempotent and safe to call on every startup.

use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "
    CREATE TABLE subjects (
        id            TEXT PRIMARY KEY,
        employee_no   TEXT UNIQUE,
        display_name  TEXT,
        active        INTEGER NOT NULL DEFAULT 1,
        created_at    TEXT NOT NULL
    );

    CREATE TABLE subject_external_ids (
        subject_id    TEXT NOT NULL REFERENCES subjects(id),
        system        TEXT NOT NULL,
        external_id   TEXT NOT NULL,
        UNIQUE (system, external_id)
    );

    CREATE TABLE devices (
        id            TEXT PRIMARY KEY,
        code          TEXT NOT NULL UNIQUE,
        name          TEXT,
        direction     TEXT,
        active        INTEGER NOT NULL DEFAULT 1,
        last_seen_at  TEXT
    );

    CREATE TABLE admissions (
        id               TEXT PRIMARY KEY,
        device_id        TEXT NOT NULL REFERENCES devices(id),
        subject_id       TEXT NOT NULL REFERENCES subjects(id),
        kind             TEXT NOT NULL,
        occurred_at      TEXT NOT NULL,
        received_at      TEXT NOT NULL,
        dedup_key        TEXT NOT NULL,
        ordinal          INTEGER,
        source_id        TEXT,
        disposition      TEXT NOT NULL,
        reject_reason    TEXT,
        clearance_result TEXT,
        payload          TEXT NOT NULL DEFAULT 'null',
        UNIQUE (device_id, dedup_key)
    );

    CREATE INDEX idx_admissions_subject_kind_ts
        ON admissions (subject_id, kind, occurred_at);
    CREATE INDEX idx_admissions_device_ts
        ON admissions (device_id, occurred_at);
    CREATE INDEX idx_admissions_source_ordinal
        ON admissions (source_id, ordinal) WHERE ordinal IS NOT NULL;

    CREATE TABLE sync_checkpoints (
        source_id        TEXT PRIMARY KEY,
        high_water_mark  INTEGER NOT NULL,
        updated_at       TEXT NOT NULL
    );
    ",
];

/// Apply any pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(&format!(
            "BEGIN;
             {sql}
             PRAGMA user_version = {version};
             COMMIT;"
        ))?;
        info!(version, "applied store migration");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let tables = table_names(&conn);
        for expected in [
            "admissions",
            "devices",
            "subject_external_ids",
            "subjects",
            "sync_checkpoints",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn admissions_unique_constraint_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO subjects (id, employee_no, created_at) VALUES ('s1', 'E1', 't');
             INSERT INTO devices (id, code) VALUES ('d1', 'GATE');
             INSERT INTO admissions
                 (id, device_id, subject_id, kind, occurred_at, received_at, dedup_key, disposition)
             VALUES ('a1', 'd1', 's1', 'GATE_IN', 't', 't', 'k1', 'ACCEPTED');",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO admissions
                 (id, device_id, subject_id, kind, occurred_at, received_at, dedup_key, disposition)
             VALUES ('a2', 'd1', 's1', 'GATE_IN', 't', 't', 'k1', 'ACCEPTED')",
            [],
        );
        assert!(dup.is_err());
    }
}
