//! Run counters and the injectable metrics sink.
//!
//! Counts flow two ways: the `metrics` crate counters feed whatever
//! recorder the host process installs, and a per-run [`MetricsSink`]
//! gives the sync loop an inspectable snapshot without process-wide
//! mutable state.

use parking_lot::Mutex;
use serde::Serialize;

/// Counter: events admitted (disposition ACCEPTED).
pub const EVENTS_ADMITTED_TOTAL: &str = "gatewatch_events_admitted_total";
/// Counter: events persisted as policy rejections.
pub const EVENTS_REJECTED_TOTAL: &str = "gatewatch_events_rejected_total";
/// Counter: re-deliveries answered from the committed record.
pub const EVENTS_DUPLICATE_TOTAL: &str = "gatewatch_events_duplicate_total";
/// Counter: events dropped for structural defects (missing dedup key,
/// missing ordinal).
pub const EVENTS_DROPPED_TOTAL: &str = "gatewatch_events_dropped_total";
/// Counter: events dropped because no subject matched the candidate key.
pub const EVENTS_UNMATCHED_TOTAL: &str = "gatewatch_events_unmatched_total";
/// Counter: events dropped because the reporting device is not
/// registered or is deactivated.
pub const EVENTS_UNKNOWN_SOURCE_TOTAL: &str = "gatewatch_events_unknown_source_total";
/// Counter: sync ticks completed.
pub const SYNC_RUNS_TOTAL: &str = "gatewatch_sync_runs_total";
/// Counter: records fetched from pull sources.
pub const SYNC_FETCHED_TOTAL: &str = "gatewatch_sync_fetched_total";
/// Counter: records newly persisted by sync.
pub const SYNC_SAVED_TOTAL: &str = "gatewatch_sync_saved_total";
/// Counter: existing records enriched by the repair pass.
pub const SYNC_REPAIRED_TOTAL: &str = "gatewatch_sync_repaired_total";
/// Gauge: consistency monitor status (0 ok, 1 degraded, 2 error).
pub const MONITOR_STATUS: &str = "gatewatch_monitor_status";

/// Counts for one pipeline/sync run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Records fetched from the source.
    pub fetched: u64,
    /// Records newly persisted.
    pub saved: u64,
    /// Policy rejections persisted.
    pub rejected: u64,
    /// Re-deliveries of already-committed records.
    pub duplicates: u64,
    /// Records dropped because no subject matched.
    pub unmatched: u64,
    /// Records dropped because the device is unregistered or disabled.
    pub unknown_source: u64,
    /// Records dropped for structural defects (missing key or ordinal).
    pub dropped: u64,
    /// Existing records enriched with later detail.
    pub repaired: u64,
    /// Records that failed transiently and will be retried.
    pub transient: u64,
}

impl RunCounts {
    /// Add another run's counts into this one.
    pub fn accumulate(&mut self, other: &RunCounts) {
        self.fetched += other.fetched;
        self.saved += other.saved;
        self.rejected += other.rejected;
        self.duplicates += other.duplicates;
        self.unmatched += other.unmatched;
        self.unknown_source += other.unknown_source;
        self.dropped += other.dropped;
        self.repaired += other.repaired;
        self.transient += other.transient;
    }
}

/// Destination for per-run counts.
pub trait MetricsSink: Send + Sync {
    /// Record one completed run.
    fn record_run(&self, counts: &RunCounts);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record_run(&self, _counts: &RunCounts) {}
}

#[derive(Debug, Default)]
struct SnapshotState {
    last: RunCounts,
    totals: RunCounts,
    runs: u64,
}

/// Sink retaining the last run and accumulated totals, for health
/// endpoints and tests.
#[derive(Debug, Default)]
pub struct SnapshotSink {
    state: Mutex<SnapshotState>,
}

impl SnapshotSink {
    /// New empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts from the most recent run.
    pub fn last(&self) -> RunCounts {
        self.state.lock().last
    }

    /// Accumulated counts across all runs.
    pub fn totals(&self) -> RunCounts {
        self.state.lock().totals
    }

    /// Number of runs recorded.
    pub fn runs(&self) -> u64 {
        self.state.lock().runs
    }
}

impl MetricsSink for SnapshotSink {
    fn record_run(&self, counts: &RunCounts) {
        let mut state = self.state.lock();
        state.last = *counts;
        state.totals.accumulate(counts);
        state.runs += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_sink_tracks_last_and_totals() {
        let sink = SnapshotSink::new();
        sink.record_run(&RunCounts {
            fetched: 10,
            saved: 7,
            duplicates: 3,
            ..RunCounts::default()
        });
        sink.record_run(&RunCounts {
            fetched: 4,
            saved: 1,
            unmatched: 1,
            repaired: 2,
            ..RunCounts::default()
        });

        assert_eq!(sink.runs(), 2);
        assert_eq!(sink.last().fetched, 4);
        assert_eq!(sink.last().repaired, 2);
        assert_eq!(sink.totals().fetched, 14);
        assert_eq!(sink.totals().saved, 8);
        assert_eq!(sink.totals().duplicates, 3);
        assert_eq!(sink.totals().unmatched, 1);
    }

    #[test]
    fn null_sink_is_inert() {
        NullSink.record_run(&RunCounts::default());
    }
}
