//! Device repository; registry of reporting devices / source channels.
//!
//! Devices are keyed by stable code; `last_seen_at` is touched on every
//! sighting so operators can spot silent channels.

use rusqlite::{Connection, OptionalExtension, params};

use gatewatch_core::{new_id, now_rfc3339};

use crate::errors::Result;
use crate::sqlite::row_types::DeviceRow;

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        direction: row.get(3)?,
        active: row.get(4)?,
        last_seen_at: row.get(5)?,
    })
}

const SELECT_COLS: &str = "id, code, name, direction, active, last_seen_at";

/// Device repository; stateless, every method takes `&Connection`.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Get device by code.
    pub fn get_by_code(conn: &Connection, code: &str) -> Result<Option<DeviceRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM devices WHERE code = ?1"),
                params![code],
                row_to_device,
            )
            .optional()?;
        Ok(row)
    }

    /// Get existing device by code (touching `last_seen_at`), or create
    /// it. A concurrent creator losing the race falls back to re-read.
    pub fn get_or_create(
        conn: &Connection,
        code: &str,
        name: Option<&str>,
        direction: Option<&str>,
    ) -> Result<DeviceRow> {
        let now = now_rfc3339();
        if let Some(existing) = Self::get_by_code(conn, code)? {
            let _ = conn.execute(
                "UPDATE devices SET last_seen_at = ?1 WHERE id = ?2",
                params![now, existing.id],
            )?;
            return Ok(DeviceRow {
                last_seen_at: Some(now),
                ..existing
            });
        }

        let id = new_id("dev");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO devices (id, code, name, direction, active, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![id, code, name, direction, now],
        )?;
        if inserted == 0 {
            // Lost the race; the winner's row is authoritative.
            return Self::get_by_code(conn, code)?.ok_or_else(|| {
                crate::errors::StoreError::Internal(format!("device {code} vanished after conflict"))
            });
        }
        Ok(DeviceRow {
            id,
            code: code.to_string(),
            name: name.map(String::from),
            direction: direction.map(String::from),
            active: true,
            last_seen_at: Some(now),
        })
    }

    /// Enable or disable a device. Disabled devices are refused at
    /// admission; history stays intact.
    pub fn set_active(conn: &Connection, code: &str, active: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE devices SET active = ?1 WHERE code = ?2",
            params![active, code],
        )?;
        Ok(changed > 0)
    }

    /// Update the static direction mapping for a device.
    pub fn set_direction(conn: &Connection, code: &str, direction: Option<&str>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE devices SET direction = ?1 WHERE code = ?2",
            params![direction, code],
        )?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn get_or_create_creates() {
        let conn = setup();
        let dev =
            DeviceRepo::get_or_create(&conn, "GATE_NORTH", Some("North gate"), Some("in")).unwrap();
        assert!(dev.id.starts_with("dev_"));
        assert_eq!(dev.code, "GATE_NORTH");
        assert_eq!(dev.direction.as_deref(), Some("in"));
        assert!(dev.active);
        assert!(dev.last_seen_at.is_some());
    }

    #[test]
    fn get_or_create_reuses_and_touches() {
        let conn = setup();
        let first = DeviceRepo::get_or_create(&conn, "GATE_NORTH", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = DeviceRepo::get_or_create(&conn, "GATE_NORTH", None, None).unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_seen_at > first.last_seen_at);
    }

    #[test]
    fn set_active_toggles() {
        let conn = setup();
        DeviceRepo::get_or_create(&conn, "GATE", None, None).unwrap();
        assert!(DeviceRepo::set_active(&conn, "GATE", false).unwrap());
        let dev = DeviceRepo::get_by_code(&conn, "GATE").unwrap().unwrap();
        assert!(!dev.active);
    }

    #[test]
    fn set_active_unknown_code() {
        let conn = setup();
        assert!(!DeviceRepo::set_active(&conn, "NOPE", false).unwrap());
    }
}
