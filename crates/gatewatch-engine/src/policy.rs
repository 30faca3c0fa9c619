//! Clearance policy: the pure decision of whether a gated action is
//! authorized, plus the deterministic ordering used when several
//! clearance records compete.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};

use gatewatch_core::{ClearanceResult, EventKind};
use gatewatch_store::AdmissionRow;

/// Time-window authorization policy for gated event kinds.
#[derive(Clone, Copy, Debug)]
pub struct ClearancePolicy {
    window: Duration,
}

impl ClearancePolicy {
    /// Policy with a lookback window of `hours`.
    pub fn from_hours(hours: i64) -> Self {
        Self {
            window: Duration::hours(hours),
        }
    }

    /// The lookback window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether an event of `kind` at `occurred_at` is authorized given
    /// the subject's accepted clearance-ok times.
    ///
    /// Pure: authorized iff the kind is not gated, or any clearance time
    /// falls in `[occurred_at - window, occurred_at]`. Both bounds
    /// inclusive; a clearance exactly window-old still authorizes, a
    /// clearance after the event never does.
    pub fn authorizes(
        &self,
        kind: EventKind,
        occurred_at: DateTime<Utc>,
        clearance_times: &[DateTime<Utc>],
    ) -> bool {
        if !kind.requires_clearance() {
            return true;
        }
        let floor = occurred_at - self.window;
        clearance_times
            .iter()
            .any(|t| *t >= floor && *t <= occurred_at)
    }
}

/// Deterministic total order for competing clearance records; greater
/// wins. Used by reconciliation when a subject has several clearance
/// rows for one shift.
///
/// Precedence: `occurred_at` desc, then source ordinal desc, then
/// result rank desc, then insert id desc. Insert ids are UUIDv7 so the
/// final tie-break is still stable across runs.
pub fn clearance_precedence(a: &AdmissionRow, b: &AdmissionRow) -> Ordering {
    let result_rank = |row: &AdmissionRow| {
        row.clearance_result
            .as_deref()
            .and_then(|s| s.parse::<ClearanceResult>().ok())
            .map_or(0, ClearanceResult::rank)
    };
    a.occurred_at
        .cmp(&b.occurred_at)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
        .then_with(|| result_rank(a).cmp(&result_rank(b)))
        .then_with(|| a.id.cmp(&b.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, 0).unwrap()
    }

    #[test]
    fn ungated_kinds_always_authorized() {
        let policy = ClearancePolicy::from_hours(6);
        assert!(policy.authorizes(EventKind::EntryPass, at(8, 0), &[]));
        assert!(policy.authorizes(EventKind::ToolReturn, at(8, 0), &[]));
        assert!(policy.authorizes(EventKind::GateOut, at(8, 0), &[]));
    }

    #[test]
    fn gated_kind_needs_clearance_in_window() {
        let policy = ClearancePolicy::from_hours(6);
        let clearance = vec![at(8, 0)];

        // 5h59m after the clearance
        assert!(policy.authorizes(EventKind::GateIn, at(13, 59), &clearance));
        // 6h01m after the clearance
        assert!(!policy.authorizes(EventKind::GateIn, at(14, 1), &clearance));
        // exactly window-old is still in
        assert!(policy.authorizes(EventKind::ToolTake, at(14, 0), &clearance));
        // no clearances at all
        assert!(!policy.authorizes(EventKind::ToolTake, at(9, 0), &[]));
    }

    #[test]
    fn clearance_after_the_event_does_not_authorize() {
        let policy = ClearancePolicy::from_hours(6);
        assert!(!policy.authorizes(EventKind::GateIn, at(7, 0), &[at(8, 0)]));
    }

    fn row(id: &str, occurred_at: &str, ordinal: Option<i64>, result: Option<&str>) -> AdmissionRow {
        AdmissionRow {
            id: id.to_string(),
            device_id: "d".to_string(),
            subject_id: "s".to_string(),
            kind: "CLEARANCE_OK".to_string(),
            occurred_at: occurred_at.to_string(),
            received_at: occurred_at.to_string(),
            dedup_key: id.to_string(),
            ordinal,
            source_id: None,
            disposition: "ACCEPTED".to_string(),
            reject_reason: None,
            clearance_result: result.map(String::from),
            payload: "null".to_string(),
        }
    }

    #[test]
    fn precedence_prefers_later_then_ordinal_then_rank_then_id() {
        let older = row("a1", "2026-08-01T08:00:00.000000Z", Some(5), Some("passed"));
        let newer = row("a2", "2026-08-01T09:00:00.000000Z", Some(1), Some("unknown"));
        assert_eq!(clearance_precedence(&newer, &older), Ordering::Greater);

        let low_ord = row("a3", "2026-08-01T09:00:00.000000Z", Some(1), Some("passed"));
        let high_ord = row("a4", "2026-08-01T09:00:00.000000Z", Some(2), Some("unknown"));
        assert_eq!(clearance_precedence(&high_ord, &low_ord), Ordering::Greater);

        let weak = row("a5", "2026-08-01T09:00:00.000000Z", Some(2), Some("under_review"));
        let strong = row("a6", "2026-08-01T09:00:00.000000Z", Some(2), Some("passed"));
        assert_eq!(clearance_precedence(&strong, &weak), Ordering::Greater);
    }

    #[test]
    fn precedence_is_deterministic_under_shuffle() {
        let rows = vec![
            row("b1", "2026-08-01T08:00:00.000000Z", None, Some("passed")),
            row("b2", "2026-08-01T09:00:00.000000Z", Some(7), Some("failed")),
            row("b3", "2026-08-01T09:00:00.000000Z", Some(9), None),
            row("b4", "2026-08-01T09:00:00.000000Z", Some(9), Some("unknown")),
        ];
        let winner = |mut v: Vec<AdmissionRow>| {
            v.sort_by(clearance_precedence);
            v.pop().unwrap().id
        };
        let forward = winner(rows.clone());
        let reversed = winner(rows.into_iter().rev().collect());
        assert_eq!(forward, reversed);
    }
}
