//! # gatewatch-core
//!
//! Foundation types shared by every GateWatch crate: event kinds,
//! subject keys, the normalized event record produced by source adapters,
//! admission dispositions, and branded ID / time helpers.
//!
//! Nothing in this crate touches the database or the network; it is the
//! vocabulary the rest of the workspace speaks.

pub mod event;

pub use event::{
    ClearanceResult, Disposition, EventKind, NormalizedEvent, ParseKindError, SubjectKey,
};

use uuid::Uuid;

/// Generate a prefixed UUIDv7 ID, e.g. `adm_018f...`.
///
/// UUIDv7 is time-ordered, so lexicographic sort on IDs matches insert
/// order; useful for diagnostics queries.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

/// Current UTC time as an RFC 3339 string (the storage format for all
/// timestamp columns).
pub fn now_rfc3339() -> String {
    sql_ts(chrono::Utc::now())
}

/// Format a timestamp for storage: RFC 3339, UTC, fixed six-digit
/// microseconds, `Z` suffix.
///
/// INVARIANT: fixed width means lexicographic order on the stored TEXT
/// equals chronological order, so SQL range predicates on timestamp
/// columns are correct without parsing.
pub fn sql_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into a UTC `DateTime`.
pub fn parse_sql_ts(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
