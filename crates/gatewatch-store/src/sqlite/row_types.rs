//! Row structs mirroring the SQLite schema.
//!
//! Timestamps are stored as fixed-width RFC 3339 TEXT (see
//! `gatewatch_core::sql_ts`); payloads as JSON strings.

use serde::Serialize;

/// One admission record; the persisted outcome of a normalized event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdmissionRow {
    /// Store-assigned ID (`adm_` + UUIDv7).
    pub id: String,
    /// Reporting device.
    pub device_id: String,
    /// Resolved subject. Always present; unresolvable events are never
    /// persisted.
    pub subject_id: String,
    /// Event kind (SQL string form).
    pub kind: String,
    /// Source-reported occurrence time.
    pub occurred_at: String,
    /// Engine receipt time.
    pub received_at: String,
    /// Source-scoped idempotency key. `(device_id, dedup_key)` is unique.
    pub dedup_key: String,
    /// Source-native ordinal (pull sources only).
    pub ordinal: Option<i64>,
    /// Pull-source identifier the ordinal is scoped to.
    pub source_id: Option<String>,
    /// ACCEPTED or REJECTED.
    pub disposition: String,
    /// Present iff rejected.
    pub reject_reason: Option<String>,
    /// Clearance result for clearance-kind records.
    pub clearance_result: Option<String>,
    /// Opaque source payload (JSON string).
    pub payload: String,
}

/// One subject (person).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubjectRow {
    /// Store-assigned ID (`subj_` + UUIDv7).
    pub id: String,
    /// Badge number, unique when present.
    pub employee_no: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Inactive subjects still resolve (history stays attributable).
    pub active: bool,
    /// Creation time.
    pub created_at: String,
}

/// One registered device / source channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceRow {
    /// Store-assigned ID (`dev_` + UUIDv7).
    pub id: String,
    /// Stable device code.
    pub code: String,
    /// Human-readable name.
    pub name: Option<String>,
    /// Normalized direction (`in`/`out`) from the static device table.
    pub direction: Option<String>,
    /// Inactive devices are refused at admission.
    pub active: bool,
    /// Last sighting.
    pub last_seen_at: Option<String>,
}

/// Per-source sync checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckpointRow {
    /// Pull-source identifier.
    pub source_id: String,
    /// Largest source-native ordinal applied so far.
    pub high_water_mark: i64,
    /// Last advance time.
    pub updated_at: String,
}
