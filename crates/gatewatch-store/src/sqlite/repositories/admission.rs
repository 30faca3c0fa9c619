//! Admission repository; the durable table of admitted/rejected events
//! and the atomic insert-or-detect-conflict primitive behind all
//! idempotency guarantees.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};

use gatewatch_core::new_id;

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::AdmissionRow;

const SELECT_COLS: &str = "id, device_id, subject_id, kind, occurred_at, received_at, dedup_key,
     ordinal, source_id, disposition, reject_reason, clearance_result, payload";

fn row_to_admission(row: &rusqlite::Row<'_>) -> rusqlite::Result<AdmissionRow> {
    Ok(AdmissionRow {
        id: row.get(0)?,
        device_id: row.get(1)?,
        subject_id: row.get(2)?,
        kind: row.get(3)?,
        occurred_at: row.get(4)?,
        received_at: row.get(5)?,
        dedup_key: row.get(6)?,
        ordinal: row.get(7)?,
        source_id: row.get(8)?,
        disposition: row.get(9)?,
        reject_reason: row.get(10)?,
        clearance_result: row.get(11)?,
        payload: row.get(12)?,
    })
}

/// Candidate admission record, pre-decision fields already resolved.
#[derive(Clone, Debug)]
pub struct NewAdmission<'a> {
    /// Resolved device row ID.
    pub device_id: &'a str,
    /// Resolved subject row ID.
    pub subject_id: &'a str,
    /// Event kind (SQL string form).
    pub kind: &'a str,
    /// Occurrence time (fixed-width RFC 3339).
    pub occurred_at: &'a str,
    /// Receipt time.
    pub received_at: &'a str,
    /// Source-scoped idempotency key.
    pub dedup_key: &'a str,
    /// Source-native ordinal, pull sources only.
    pub ordinal: Option<i64>,
    /// Pull-source identifier the ordinal is scoped to.
    pub source_id: Option<&'a str>,
    /// ACCEPTED or REJECTED.
    pub disposition: &'a str,
    /// Present iff rejected.
    pub reject_reason: Option<&'a str>,
    /// Clearance result for clearance-kind records.
    pub clearance_result: Option<&'a str>,
    /// Opaque payload, JSON string.
    pub payload: &'a str,
}

/// Result of [`AdmissionRepo::try_insert`].
#[derive(Clone, Debug)]
pub enum InsertOutcome {
    /// This call created the record.
    Inserted(AdmissionRow),
    /// The `(device_id, dedup_key)` pair was already committed; the
    /// previously committed record is returned so callers can report the
    /// prior outcome idempotently.
    AlreadyExists(AdmissionRow),
}

impl InsertOutcome {
    /// The record either way.
    pub fn record(&self) -> &AdmissionRow {
        match self {
            Self::Inserted(row) | Self::AlreadyExists(row) => row,
        }
    }
}

/// Fields the enrichment pass may change. `disposition`, `dedup_key`,
/// and identity columns are deliberately absent.
#[derive(Clone, Debug, Default)]
pub struct EnrichUpdate<'a> {
    /// Corrected kind (e.g. CLEARANCE_FAIL once a review concludes).
    pub kind: Option<&'a str>,
    /// Corrected occurrence time.
    pub occurred_at: Option<&'a str>,
    /// Upgraded clearance result.
    pub clearance_result: Option<&'a str>,
    /// Enriched payload (JSON string).
    pub payload: Option<&'a str>,
}

/// Admission repository; stateless, every method takes `&Connection`.
pub struct AdmissionRepo;

impl AdmissionRepo {
    /// Atomically insert a record or detect the idempotency conflict.
    ///
    /// Single `INSERT OR IGNORE` arbitrated by the
    /// `UNIQUE (device_id, dedup_key)` constraint; no separate
    /// pre-check, so concurrent callers with the same key race safely:
    /// exactly one inserts, the rest re-read the winner's row.
    pub fn try_insert(conn: &Connection, new: &NewAdmission<'_>) -> Result<InsertOutcome> {
        let id = new_id("adm");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO admissions
                 (id, device_id, subject_id, kind, occurred_at, received_at,
                  dedup_key, ordinal, source_id, disposition, reject_reason,
                  clearance_result, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                new.device_id,
                new.subject_id,
                new.kind,
                new.occurred_at,
                new.received_at,
                new.dedup_key,
                new.ordinal,
                new.source_id,
                new.disposition,
                new.reject_reason,
                new.clearance_result,
                new.payload,
            ],
        )?;

        let committed = Self::get_by_dedup(conn, new.device_id, new.dedup_key)?.ok_or_else(|| {
            StoreError::Internal(format!(
                "admission ({}, {}) missing after insert",
                new.device_id, new.dedup_key
            ))
        })?;

        if inserted > 0 {
            Ok(InsertOutcome::Inserted(committed))
        } else {
            Ok(InsertOutcome::AlreadyExists(committed))
        }
    }

    /// Get by store ID.
    pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<AdmissionRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM admissions WHERE id = ?1"),
                params![id],
                row_to_admission,
            )
            .optional()?;
        Ok(row)
    }

    /// Get by the idempotency key.
    pub fn get_by_dedup(
        conn: &Connection,
        device_id: &str,
        dedup_key: &str,
    ) -> Result<Option<AdmissionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLS} FROM admissions
                     WHERE device_id = ?1 AND dedup_key = ?2"
                ),
                params![device_id, dedup_key],
                row_to_admission,
            )
            .optional()?;
        Ok(row)
    }

    /// Batched duplicate lookup for the bulk-ingest path: one query for
    /// all candidate keys of one device.
    pub fn get_by_dedup_many(
        conn: &Connection,
        device_id: &str,
        dedup_keys: &[&str],
    ) -> Result<HashMap<String, AdmissionRow>> {
        if dedup_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; dedup_keys.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM admissions
             WHERE device_id = ? AND dedup_key IN ({placeholders})"
        ))?;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&device_id];
        for key in dedup_keys {
            sql_params.push(key);
        }
        let rows = stmt
            .query_map(&sql_params[..], row_to_admission)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(|r| (r.dedup_key.clone(), r)).collect())
    }

    /// Accepted clearance-ok occurrence times per subject within
    /// `[from, to]`, batched across subjects for the bulk path.
    pub fn clearances_in_window(
        conn: &Connection,
        subject_ids: &[&str],
        from: &str,
        to: &str,
    ) -> Result<HashMap<String, Vec<String>>> {
        if subject_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; subject_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT subject_id, occurred_at FROM admissions
             WHERE subject_id IN ({placeholders})
               AND kind = 'CLEARANCE_OK'
               AND disposition = 'ACCEPTED'
               AND occurred_at >= ? AND occurred_at <= ?
             ORDER BY occurred_at ASC"
        ))?;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(subject_ids.len() + 2);
        for id in subject_ids {
            sql_params.push(id);
        }
        sql_params.push(&from);
        sql_params.push(&to);

        let rows = stmt
            .query_map(&sql_params[..], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for (subject_id, ts) in rows {
            out.entry(subject_id).or_default().push(ts);
        }
        Ok(out)
    }

    /// Debounce lookup: the most recent record for the same
    /// (device, subject, kind) with `occurred_at` in `[lo, hi]`,
    /// regardless of dedup key or disposition. A rejection re-fired
    /// with a fresh nonce is still the same physical pass.
    pub fn debounce_match(
        conn: &Connection,
        device_id: &str,
        subject_id: &str,
        kind: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Option<AdmissionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLS} FROM admissions
                     WHERE device_id = ?1 AND subject_id = ?2 AND kind = ?3
                       AND occurred_at >= ?4 AND occurred_at <= ?5
                     ORDER BY occurred_at DESC
                     LIMIT 1"
                ),
                params![device_id, subject_id, kind, lo, hi],
                row_to_admission,
            )
            .optional()?;
        Ok(row)
    }

    /// The `limit` largest ordinals one source has contributed,
    /// descending. Ordinals are only comparable within a source, so
    /// the consistency monitor never mixes sources here.
    pub fn latest_ordinals(conn: &Connection, source_id: &str, limit: usize) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT ordinal FROM admissions
             WHERE source_id = ?1 AND ordinal IS NOT NULL
             ORDER BY ordinal DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![source_id, limit.max(1) as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(rows)
    }

    /// Largest ordinal one source has contributed, if any.
    pub fn max_ordinal(conn: &Connection, source_id: &str) -> Result<Option<i64>> {
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(ordinal) FROM admissions WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// One source's recent clearance records still lacking a concrete
    /// result; candidates for the repair pass.
    pub fn incomplete_clearances(
        conn: &Connection,
        source_id: &str,
        limit: usize,
    ) -> Result<Vec<AdmissionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM admissions
             WHERE source_id = ?1
               AND kind IN ('CLEARANCE_OK', 'CLEARANCE_FAIL')
               AND ordinal IS NOT NULL
               AND (clearance_result IS NULL
                    OR clearance_result IN ('unknown', 'under_review'))
             ORDER BY ordinal DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![source_id, limit.max(1) as i64], row_to_admission)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply an enrichment update. `disposition` and identity columns
    /// cannot change through this path.
    pub fn enrich(conn: &Connection, id: &str, update: &EnrichUpdate<'_>) -> Result<()> {
        let changed = conn.execute(
            "UPDATE admissions SET
                 kind             = COALESCE(?1, kind),
                 occurred_at      = COALESCE(?2, occurred_at),
                 clearance_result = COALESCE(?3, clearance_result),
                 payload          = COALESCE(?4, payload)
             WHERE id = ?5",
            params![
                update.kind,
                update.occurred_at,
                update.clearance_result,
                update.payload,
                id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("admission {id}")));
        }
        Ok(())
    }

    /// Total record count.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM admissions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recent records by occurrence time (diagnostics).
    pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<AdmissionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLS} FROM admissions
             ORDER BY occurred_at DESC
             LIMIT ?"
        ))?;
        let rows = stmt
            .query_map(params![limit.max(1) as i64], row_to_admission)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
