//! High-level `AdmissionStore` wrapping the connection pool and all
//! repositories.
//!
//! All write methods run inside a transaction so callers never see
//! partial state.
//!
//! INVARIANT: writes are serialized through a single in-process lock;
//! SQLite `UNIQUE (device_id, dedup_key)` enforces idempotency at the
//! DB level regardless, so a second process sharing the file cannot
//! break the guarantee.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::instrument;

use gatewatch_core::SubjectKey;

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::repositories::{
    AdmissionRepo, CheckpointRepo, DeviceRepo, EnrichUpdate, InsertOutcome, NewAdmission,
    SubjectRepo,
};
use crate::sqlite::row_types::{AdmissionRow, CheckpointRow, DeviceRow, SubjectRow};
use crate::sqlite::{new_in_memory, new_pool, run_migrations};

/// High-level store over the SQLite backing.
pub struct AdmissionStore {
    pool: ConnectionPool,
    write_lock: Mutex<()>,
}

impl AdmissionStore {
    const SQLITE_BUSY_MAX_RETRIES: u32 = 32;

    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (and migrate) a store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let pool = new_pool(path, &ConnectionConfig::default())?;
        let conn = pool.get()?;
        run_migrations(&conn)?;
        drop(conn);
        Ok(Self::new(pool))
    }

    /// Open (and migrate) an in-memory store. Test and tooling use.
    pub fn in_memory() -> Result<Self> {
        let pool = new_in_memory(&ConnectionConfig::default())?;
        let conn = pool.get()?;
        run_migrations(&conn)?;
        drop(conn);
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn lock_write(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Internal("write lock poisoned".into()))
    }

    fn with_write_lock<T>(&self, f: impl FnMut() -> Result<T>) -> Result<T> {
        let _guard = self.lock_write()?;
        self.retry_on_sqlite_busy(f)
    }

    /// Retry an operation on `SQLite` BUSY/LOCKED with linear backoff +
    /// jitter. Backoff: base = min(attempts * 10, 500) ms, jitter ±25%.
    #[allow(clippy::unused_self)]
    fn retry_on_sqlite_busy<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err)
                    if Self::is_sqlite_busy_or_locked(&err)
                        && attempts < Self::SQLITE_BUSY_MAX_RETRIES =>
                {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_sqlite_busy_or_locked(err: &StoreError) -> bool {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => {
                matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Admissions
    // ─────────────────────────────────────────────────────────────────────

    /// Insert one admission record, or return the previously committed
    /// record for the same `(device_id, dedup_key)`.
    #[instrument(skip(self, new), fields(device_id = new.device_id, dedup_key = new.dedup_key))]
    pub fn try_insert_admission(&self, new: &NewAdmission<'_>) -> Result<InsertOutcome> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let outcome = AdmissionRepo::try_insert(&tx, new)?;
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Insert a batch of admission records in one transaction.
    ///
    /// Outcomes come back in input order. If the transaction cannot
    /// commit, the whole batch fails with `StoreError::Transient` and no
    /// record is persisted; callers report every item as retriable.
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    pub fn try_insert_batch(&self, batch: &[NewAdmission<'_>]) -> Result<Vec<InsertOutcome>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.with_write_lock(|| {
            let conn = self.conn()?;
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| StoreError::Transient(format!("batch begin failed: {e}")))?;
            let mut outcomes = Vec::with_capacity(batch.len());
            for new in batch {
                outcomes.push(AdmissionRepo::try_insert(&tx, new)?);
            }
            tx.commit()
                .map_err(|e| StoreError::Transient(format!("batch commit failed: {e}")))?;
            Ok(outcomes)
        })
    }

    /// Apply an enrichment update to an admission record.
    pub fn enrich_admission(&self, id: &str, update: &EnrichUpdate<'_>) -> Result<()> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            AdmissionRepo::enrich(&tx, id, update)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Get an admission by store ID.
    pub fn get_admission(&self, id: &str) -> Result<Option<AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::get_by_id(&conn, id)
    }

    /// Get an admission by its idempotency key.
    pub fn get_by_dedup(&self, device_id: &str, dedup_key: &str) -> Result<Option<AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::get_by_dedup(&conn, device_id, dedup_key)
    }

    /// Batched duplicate lookup for one device.
    pub fn get_by_dedup_many(
        &self,
        device_id: &str,
        dedup_keys: &[&str],
    ) -> Result<HashMap<String, AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::get_by_dedup_many(&conn, device_id, dedup_keys)
    }

    /// Accepted clearance-ok times per subject within `[from, to]`.
    pub fn clearances_in_window(
        &self,
        subject_ids: &[&str],
        from: &str,
        to: &str,
    ) -> Result<HashMap<String, Vec<String>>> {
        let conn = self.conn()?;
        AdmissionRepo::clearances_in_window(&conn, subject_ids, from, to)
    }

    /// Most recent same-shape record within the debounce range, if any.
    pub fn debounce_match(
        &self,
        device_id: &str,
        subject_id: &str,
        kind: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Option<AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::debounce_match(&conn, device_id, subject_id, kind, lo, hi)
    }

    /// The `limit` largest ordinals one source contributed, descending.
    pub fn latest_ordinals(&self, source_id: &str, limit: usize) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        AdmissionRepo::latest_ordinals(&conn, source_id, limit)
    }

    /// Largest ordinal one source contributed, if any.
    pub fn max_ordinal(&self, source_id: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        AdmissionRepo::max_ordinal(&conn, source_id)
    }

    /// One source's recent clearance records lacking a concrete result.
    pub fn incomplete_clearances(&self, source_id: &str, limit: usize) -> Result<Vec<AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::incomplete_clearances(&conn, source_id, limit)
    }

    /// Total admission count.
    pub fn count_admissions(&self) -> Result<i64> {
        let conn = self.conn()?;
        AdmissionRepo::count(&conn)
    }

    /// Most recent admissions by occurrence time.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<AdmissionRow>> {
        let conn = self.conn()?;
        AdmissionRepo::list_recent(&conn, limit)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subjects and devices
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve one candidate key to a subject.
    pub fn resolve_subject(&self, key: &SubjectKey) -> Result<Option<SubjectRow>> {
        let conn = self.conn()?;
        SubjectRepo::resolve(&conn, key)
    }

    /// Resolve many candidate keys in batched queries.
    pub fn resolve_subjects(&self, keys: &[SubjectKey]) -> Result<HashMap<SubjectKey, SubjectRow>> {
        let conn = self.conn()?;
        SubjectRepo::resolve_many(&conn, keys)
    }

    /// Create a subject.
    pub fn create_subject(
        &self,
        employee_no: Option<&str>,
        display_name: Option<&str>,
        external: Option<(&str, &str)>,
    ) -> Result<SubjectRow> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let row = SubjectRepo::create(&tx, employee_no, display_name, external)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Add an external-id mapping to an existing subject.
    pub fn add_subject_external_id(
        &self,
        subject_id: &str,
        system: &str,
        external_id: &str,
    ) -> Result<()> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            SubjectRepo::add_external_id(&conn, subject_id, system, external_id)
        })
    }

    /// Get a device by code.
    pub fn get_device(&self, code: &str) -> Result<Option<DeviceRow>> {
        let conn = self.conn()?;
        DeviceRepo::get_by_code(&conn, code)
    }

    /// Get or register a device, touching `last_seen_at`.
    pub fn get_or_create_device(
        &self,
        code: &str,
        name: Option<&str>,
        direction: Option<&str>,
    ) -> Result<DeviceRow> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            DeviceRepo::get_or_create(&conn, code, name, direction)
        })
    }

    /// Enable or disable a device.
    pub fn set_device_active(&self, code: &str, active: bool) -> Result<bool> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            DeviceRepo::set_active(&conn, code, active)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Checkpoints
    // ─────────────────────────────────────────────────────────────────────

    /// Current checkpoint for a pull source.
    pub fn get_checkpoint(&self, source_id: &str) -> Result<Option<CheckpointRow>> {
        let conn = self.conn()?;
        CheckpointRepo::get(&conn, source_id)
    }

    /// Advance a source's checkpoint; never moves backwards. Returns the
    /// mark now in effect.
    #[instrument(skip(self))]
    pub fn advance_checkpoint(&self, source_id: &str, ordinal: i64) -> Result<i64> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            CheckpointRepo::advance(&conn, source_id, ordinal)
        })
    }

    /// Drop a source's checkpoint.
    pub fn reset_checkpoint(&self, source_id: &str) -> Result<bool> {
        self.with_write_lock(|| {
            let conn = self.conn()?;
            CheckpointRepo::reset(&conn, source_id)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use gatewatch_core::sql_ts;
    use std::sync::Arc;

    fn ts(h: u32, m: u32, s: u32) -> String {
        sql_ts(Utc.with_ymd_and_hms(2026, 8, 1, h, m, s).unwrap())
    }

    fn seeded() -> (AdmissionStore, String, String) {
        let store = AdmissionStore::in_memory().unwrap();
        let device = store.get_or_create_device("GATE_NORTH", None, Some("in")).unwrap();
        let subject = store.create_subject(Some("E-1"), None, None).unwrap();
        (store, device.id, subject.id)
    }

    #[test]
    fn insert_and_read_back() {
        let (store, device_id, subject_id) = seeded();
        let at = ts(8, 0, 0);
        let outcome = store
            .try_insert_admission(&NewAdmission {
                device_id: &device_id,
                subject_id: &subject_id,
                kind: "GATE_IN",
                occurred_at: &at,
                received_at: &at,
                dedup_key: "sn-1",
                ordinal: None,
                source_id: None,
                disposition: "ACCEPTED",
                reject_reason: None,
                clearance_result: None,
                payload: "null",
            })
            .unwrap();
        let row = assert_matches!(outcome, InsertOutcome::Inserted(row) => row);
        assert_eq!(store.get_admission(&row.id).unwrap().unwrap(), row);
    }

    #[test]
    fn concurrent_same_key_inserts_at_most_one_record() {
        let (store, device_id, subject_id) = seeded();
        let store = Arc::new(store);
        let at = ts(8, 0, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let device_id = device_id.clone();
                let subject_id = subject_id.clone();
                let at = at.clone();
                std::thread::spawn(move || {
                    store
                        .try_insert_admission(&NewAdmission {
                            device_id: &device_id,
                            subject_id: &subject_id,
                            kind: "GATE_IN",
                            occurred_at: &at,
                            received_at: &at,
                            dedup_key: "contended",
                            ordinal: None,
                            source_id: None,
                            disposition: "ACCEPTED",
                            reject_reason: None,
                            clearance_result: None,
                            payload: "null",
                        })
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes
            .iter()
            .filter(|o| matches!(o, InsertOutcome::Inserted(_)))
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_admissions().unwrap(), 1);
    }

    #[test]
    fn batch_outcomes_in_input_order() {
        let (store, device_id, subject_id) = seeded();
        let at = ts(9, 0, 0);

        let mk = |key: &'static str| NewAdmission {
            device_id: &device_id,
            subject_id: &subject_id,
            kind: "ENTRY_PASS",
            occurred_at: &at,
            received_at: &at,
            dedup_key: key,
            ordinal: None,
            source_id: None,
            disposition: "ACCEPTED",
            reject_reason: None,
            clearance_result: None,
            payload: "null",
        };
        store.try_insert_admission(&mk("dup")).unwrap();

        let outcomes = store
            .try_insert_batch(&[mk("a"), mk("dup"), mk("b")])
            .unwrap();
        assert_matches!(outcomes[0], InsertOutcome::Inserted(_));
        assert_matches!(outcomes[1], InsertOutcome::AlreadyExists(_));
        assert_matches!(outcomes[2], InsertOutcome::Inserted(_));
        assert_eq!(store.count_admissions().unwrap(), 3);
    }

    #[test]
    fn checkpoint_round_trip() {
        let (store, _, _) = seeded();
        assert!(store.get_checkpoint("portal").unwrap().is_none());
        assert_eq!(store.advance_checkpoint("portal", 110).unwrap(), 110);
        assert_eq!(store.advance_checkpoint("portal", 90).unwrap(), 110);
        assert_eq!(
            store.get_checkpoint("portal").unwrap().unwrap().high_water_mark,
            110
        );
    }
}
