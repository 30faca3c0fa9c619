//! # gatewatch-sync
//!
//! Keeps the admission store converged with external pull sources:
//! a checkpointed sync loop per source, a best-effort repair pass for
//! clearance records that concluded after first sight, and a read-only
//! consistency monitor grading the drift.

pub mod errors;
pub mod monitor;
pub mod source;
pub mod sync_loop;

pub use errors::{Result, SyncError};
pub use monitor::{ConsistencyMonitor, ConsistencyReport, HealthStatus};
pub use source::PullSource;
pub use sync_loop::{LoopState, SyncLoop};

use gatewatch_engine::{RunCounts, SnapshotSink};

/// Run store-bound work on the blocking pool so the loop and monitor
/// timers stay live while SQLite (and its busy-retry sleeps) grinds.
pub(crate) async fn run_blocking<T, E, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<SyncError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(out) => out.map_err(Into::into),
        Err(err) => Err(SyncError::Internal(format!("blocking task failed: {err}"))),
    }
}

/// Aggregated sync health for surfacing on an operator endpoint.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHealth {
    /// Counts from the most recent completed run.
    pub last_run: RunCounts,
    /// Accumulated counts across all runs.
    pub totals: RunCounts,
    /// Runs completed since startup.
    pub runs: u64,
    /// Latest consistency report, if a check has run.
    pub consistency: Option<ConsistencyReport>,
}

impl SyncHealth {
    /// Assemble a snapshot from the loop's sink and the monitor.
    pub fn snapshot(sink: &SnapshotSink, monitor: &ConsistencyMonitor) -> Self {
        Self {
            last_run: sink.last(),
            totals: sink.totals(),
            runs: sink.runs(),
            consistency: monitor.latest_report(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gatewatch_engine::MetricsSink;
    use std::time::Duration;

    #[tokio::test]
    async fn blocking_work_runs_off_the_runtime_thread() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        // the closure blocks until an async task on the same
        // single-threaded runtime sends; inline execution would deadlock
        let waiter = run_blocking(move || {
            rx.recv()
                .map(|()| 7)
                .map_err(|e| SyncError::Internal(e.to_string()))
        });
        let sender = async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(()).unwrap();
        };

        let got = tokio::time::timeout(Duration::from_secs(5), async {
            let (got, ()) = tokio::join!(waiter, sender);
            got
        })
        .await
        .expect("blocking call starved the runtime")
        .unwrap();
        assert_eq!(got, 7);
    }

    #[test]
    fn health_snapshot_reflects_sink() {
        let sink = SnapshotSink::new();
        sink.record_run(&RunCounts {
            fetched: 5,
            saved: 5,
            ..RunCounts::default()
        });

        // no monitor run yet: consistency stays empty
        let store = std::sync::Arc::new(gatewatch_store::AdmissionStore::in_memory().unwrap());
        let source: std::sync::Arc<dyn PullSource> = std::sync::Arc::new(NoopSource);
        let monitor = ConsistencyMonitor::new(
            store,
            source,
            gatewatch_settings::MonitorSettings::default(),
        );

        let health = SyncHealth::snapshot(&sink, &monitor);
        assert_eq!(health.runs, 1);
        assert_eq!(health.last_run.saved, 5);
        assert!(health.consistency.is_none());
    }

    struct NoopSource;

    #[async_trait::async_trait]
    impl PullSource for NoopSource {
        fn source_id(&self) -> &str {
            "noop"
        }

        async fn fetch_since(
            &self,
            _high_water_mark: i64,
            _max_pages: u32,
        ) -> Result<Vec<gatewatch_core::NormalizedEvent>> {
            Ok(Vec::new())
        }

        async fn fetch_recent(
            &self,
            _max_pages: u32,
        ) -> Result<Vec<gatewatch_core::NormalizedEvent>> {
            Ok(Vec::new())
        }
    }
}
