//! Sync-checkpoint repository; per-source high-water marks.
//!
//! Advancement is monotonic at the SQL level: a late or replayed
//! apply can never move a checkpoint backwards.

use rusqlite::{Connection, OptionalExtension, params};

use gatewatch_core::now_rfc3339;

use crate::errors::Result;
use crate::sqlite::row_types::CheckpointRow;

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
    Ok(CheckpointRow {
        source_id: row.get(0)?,
        high_water_mark: row.get(1)?,
        updated_at: row.get(2)?,
    })
}

/// Checkpoint repository; stateless, every method takes `&Connection`.
pub struct CheckpointRepo;

impl CheckpointRepo {
    /// Current checkpoint for a source, if any run has ever committed.
    pub fn get(conn: &Connection, source_id: &str) -> Result<Option<CheckpointRow>> {
        let row = conn
            .query_row(
                "SELECT source_id, high_water_mark, updated_at
                 FROM sync_checkpoints WHERE source_id = ?1",
                params![source_id],
                row_to_checkpoint,
            )
            .optional()?;
        Ok(row)
    }

    /// Advance the checkpoint to `ordinal` if it is ahead of the stored
    /// mark. Returns the mark now in effect.
    pub fn advance(conn: &Connection, source_id: &str, ordinal: i64) -> Result<i64> {
        let now = now_rfc3339();
        let _ = conn.execute(
            "INSERT INTO sync_checkpoints (source_id, high_water_mark, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (source_id) DO UPDATE SET
                 high_water_mark = MAX(high_water_mark, excluded.high_water_mark),
                 updated_at = excluded.updated_at",
            params![source_id, ordinal, now],
        )?;
        let mark: i64 = conn.query_row(
            "SELECT high_water_mark FROM sync_checkpoints WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(mark)
    }

    /// Drop a source's checkpoint so the next run re-scans from zero.
    pub fn reset(conn: &Connection, source_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM sync_checkpoints WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(changed > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
