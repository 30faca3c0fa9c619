//! Push-path debounce filter.
//!
//! Vendor devices re-fire on a stuck badge or a double swipe, each time
//! with a fresh serial number; so dedup keys alone cannot catch it.
//! The filter suppresses a candidate when a record for the same
//! (device, subject, kind) already sits within the window, whatever its
//! disposition, and hands back the prior record so the caller reports
//! idempotently. A refused gate-in re-fired seconds later is still one
//! refusal, not two.
//!
//! Pull sources are exempt: their records carry authoritative ordinals
//! and re-scans must not be suppressed.

use chrono::{DateTime, Duration, Utc};

use gatewatch_core::{EventKind, sql_ts};
use gatewatch_store::{AdmissionRow, AdmissionStore};

use crate::errors::Result;

/// Time-proximity suppression for push submissions.
#[derive(Clone, Copy, Debug)]
pub struct DebounceFilter {
    window: Duration,
}

impl DebounceFilter {
    /// Filter with a ± window of `seconds`.
    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            window: Duration::seconds(seconds),
        }
    }

    /// The record shadowing this candidate, if any.
    pub fn prior_record(
        &self,
        store: &AdmissionStore,
        device_id: &str,
        subject_id: &str,
        kind: EventKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<AdmissionRow>> {
        let lo = sql_ts(occurred_at - self.window);
        let hi = sql_ts(occurred_at + self.window);
        let prior = store.debounce_match(device_id, subject_id, kind.as_sql(), &lo, &hi)?;
        Ok(prior)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
