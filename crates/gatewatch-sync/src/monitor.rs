//! Read-only consistency monitor.
//!
//! Compares the source's latest ordinals against the store's and grades
//! the drift. It never mutates anything; repairs belong to the sync
//! loop; this only answers "are we behind, and by how much".

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use gatewatch_core::now_rfc3339;
use gatewatch_engine::metrics::MONITOR_STATUS;
use gatewatch_settings::MonitorSettings;
use gatewatch_store::AdmissionStore;

use crate::errors::Result;
use crate::run_blocking;
use crate::source::PullSource;

/// Consistency grade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Store and source agree on the sampled window.
    Ok,
    /// The store is missing or trailing source records.
    Degraded,
    /// The check itself failed (source unreachable, store error).
    Error,
}

impl HealthStatus {
    fn as_gauge(self) -> f64 {
        match self {
            Self::Ok => 0.0,
            Self::Degraded => 1.0,
            Self::Error => 2.0,
        }
    }
}

/// One consistency check's findings.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Latest ordinals the source reports, newest first.
    pub source_latest: Vec<i64>,
    /// Latest ordinals the store holds, newest first.
    pub store_latest: Vec<i64>,
    /// Sampled source ordinals absent from the store.
    pub missing_in_store: Vec<i64>,
    /// Sampled store ordinals the source no longer reports.
    pub unexpected_in_store: Vec<i64>,
    /// Newest source ordinal minus newest store ordinal; positive means
    /// the store is behind.
    pub latest_gap: i64,
    /// Overall grade.
    pub status: HealthStatus,
    /// Human-readable summary.
    pub message: String,
    /// When the check ran.
    pub checked_at: String,
    /// Failure detail when `status` is `Error`.
    pub error: Option<String>,
}

/// Periodic and on-demand source-vs-store comparison.
pub struct ConsistencyMonitor {
    store: Arc<AdmissionStore>,
    source: Arc<dyn PullSource>,
    settings: MonitorSettings,
    latest: Arc<RwLock<Option<ConsistencyReport>>>,
}

impl ConsistencyMonitor {
    /// Build a monitor over one source.
    pub fn new(
        store: Arc<AdmissionStore>,
        source: Arc<dyn PullSource>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// The most recent report, if any check has run.
    pub fn latest_report(&self) -> Option<ConsistencyReport> {
        self.latest.read().clone()
    }

    /// Run one check now. Failures are folded into the report rather
    /// than returned, so health endpoints always have something to show.
    #[instrument(skip(self), fields(source = self.source.source_id()))]
    pub async fn check(&self) -> ConsistencyReport {
        let report = match self.check_inner().await {
            Ok(report) => report,
            Err(err) => {
                warn!(source = self.source.source_id(), error = %err, "consistency check failed");
                ConsistencyReport {
                    source_latest: Vec::new(),
                    store_latest: Vec::new(),
                    missing_in_store: Vec::new(),
                    unexpected_in_store: Vec::new(),
                    latest_gap: 0,
                    status: HealthStatus::Error,
                    message: "consistency check failed".to_string(),
                    checked_at: now_rfc3339(),
                    error: Some(err.to_string()),
                }
            }
        };
        gauge!(MONITOR_STATUS).set(report.status.as_gauge());
        *self.latest.write() = Some(report.clone());
        report
    }

    async fn check_inner(&self) -> Result<ConsistencyReport> {
        let sample = self.settings.sample_size.max(1);

        let recent = self.source.fetch_recent(self.settings.max_pages).await?;
        let mut source_latest: Vec<i64> = recent.iter().filter_map(|e| e.ordinal).collect();
        source_latest.sort_unstable_by(|a, b| b.cmp(a));
        source_latest.dedup();
        source_latest.truncate(sample);

        let store_latest = {
            let store = Arc::clone(&self.store);
            let source_id = self.source.source_id().to_string();
            run_blocking(move || store.latest_ordinals(&source_id, sample)).await?
        };

        let source_set: HashSet<i64> = source_latest.iter().copied().collect();
        let store_set: HashSet<i64> = store_latest.iter().copied().collect();

        // Only compare inside the overlap of the two sampled windows;
        // below that, absence is an artifact of the sample, not drift.
        let store_floor = store_latest.last().copied().unwrap_or(i64::MIN);
        let source_floor = source_latest.last().copied().unwrap_or(i64::MIN);

        let mut missing_in_store: Vec<i64> = source_latest
            .iter()
            .copied()
            .filter(|o| *o >= store_floor && !store_set.contains(o))
            .collect();
        missing_in_store.sort_unstable();
        let mut unexpected_in_store: Vec<i64> = store_latest
            .iter()
            .copied()
            .filter(|o| *o >= source_floor && !source_set.contains(o))
            .collect();
        unexpected_in_store.sort_unstable();

        let latest_gap = match (source_latest.first(), store_latest.first()) {
            (Some(src), Some(dst)) => src - dst,
            (Some(src), None) => *src,
            _ => 0,
        };

        let (status, message) = if !missing_in_store.is_empty() || latest_gap > 0 {
            (
                HealthStatus::Degraded,
                format!(
                    "store trails source: {} missing, newest gap {}",
                    missing_in_store.len(),
                    latest_gap.max(0)
                ),
            )
        } else if !unexpected_in_store.is_empty() {
            // The store keeps records the source has retracted; that is
            // complete, not behind. It still gets called out in the
            // message for operators chasing a retention mismatch.
            (
                HealthStatus::Ok,
                format!(
                    "store complete; holds {} ordinals the source no longer reports",
                    unexpected_in_store.len()
                ),
            )
        } else {
            (
                HealthStatus::Ok,
                format!("store and source agree on the latest {sample} records"),
            )
        };

        Ok(ConsistencyReport {
            source_latest,
            store_latest,
            missing_in_store,
            unexpected_in_store,
            latest_gap,
            status,
            message,
            checked_at: now_rfc3339(),
            error: None,
        })
    }

    /// Spawn the periodic check task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    /// Check on a timer until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.settings.interval_seconds.max(60));
        info!(source = self.source.source_id(), "consistency monitor started");
        loop {
            let report = self.check().await;
            if report.status != HealthStatus::Ok {
                warn!(
                    source = self.source.source_id(),
                    status = ?report.status,
                    message = %report.message,
                    "consistency drift detected"
                );
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        info!(source = self.source.source_id(), "consistency monitor stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use gatewatch_core::{EventKind, NormalizedEvent, SubjectKey, sql_ts};
    use gatewatch_store::NewAdmission;
    use parking_lot::Mutex;

    struct FakeSource {
        recent: Mutex<Vec<NormalizedEvent>>,
        fail: Mutex<bool>,
    }

    impl FakeSource {
        fn with_ordinals(ordinals: &[i64]) -> Arc<Self> {
            let recent = ordinals
                .iter()
                .map(|&o| {
                    NormalizedEvent::new(
                        "EXAM_PORTAL",
                        SubjectKey::employee_no("E-1"),
                        EventKind::ClearanceOk,
                        format!("portal-{o}"),
                    )
                    .with_ordinal(o)
                })
                .collect();
            Arc::new(Self {
                recent: Mutex::new(recent),
                fail: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl PullSource for FakeSource {
        fn source_id(&self) -> &str {
            "portal"
        }

        async fn fetch_since(
            &self,
            _high_water_mark: i64,
            _max_pages: u32,
        ) -> Result<Vec<NormalizedEvent>> {
            Ok(Vec::new())
        }

        async fn fetch_recent(&self, _max_pages: u32) -> Result<Vec<NormalizedEvent>> {
            if *self.fail.lock() {
                return Err(SyncError::Source("portal unreachable".to_string()));
            }
            Ok(self.recent.lock().clone())
        }
    }

    fn store_with_ordinals(ordinals: &[i64]) -> Arc<AdmissionStore> {
        let store = AdmissionStore::in_memory().unwrap();
        let device = store.get_or_create_device("EXAM_PORTAL", None, None).unwrap();
        let subject = store.create_subject(Some("E-1"), None, None).unwrap();
        let ts = sql_ts(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());
        for &ordinal in ordinals {
            let key = format!("portal-{ordinal}");
            store
                .try_insert_admission(&NewAdmission {
                    device_id: &device.id,
                    subject_id: &subject.id,
                    kind: "CLEARANCE_OK",
                    occurred_at: &ts,
                    received_at: &ts,
                    dedup_key: &key,
                    ordinal: Some(ordinal),
                    source_id: Some("portal"),
                    disposition: "ACCEPTED",
                    reject_reason: None,
                    clearance_result: Some("passed"),
                    payload: "null",
                })
                .unwrap();
        }
        Arc::new(store)
    }

    fn monitor(store: Arc<AdmissionStore>, source: Arc<FakeSource>) -> ConsistencyMonitor {
        ConsistencyMonitor::new(store, source, MonitorSettings::default())
    }

    #[tokio::test]
    async fn agreement_is_ok() {
        let ordinals: Vec<i64> = (101..=110).collect();
        let m = monitor(
            store_with_ordinals(&ordinals),
            FakeSource::with_ordinals(&ordinals),
        );
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert!(report.missing_in_store.is_empty());
        assert_eq!(report.latest_gap, 0);
        assert!(m.latest_report().is_some());
    }

    #[tokio::test]
    async fn missing_ordinal_degrades() {
        let store_ords: Vec<i64> = (101..=110).filter(|&o| o != 105).collect();
        let source_ords: Vec<i64> = (101..=110).collect();
        let m = monitor(
            store_with_ordinals(&store_ords),
            FakeSource::with_ordinals(&source_ords),
        );
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.missing_in_store, vec![105]);
    }

    #[tokio::test]
    async fn store_trailing_newest_degrades() {
        let m = monitor(
            store_with_ordinals(&[101, 102, 103]),
            FakeSource::with_ordinals(&[101, 102, 103, 104, 105]),
        );
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.latest_gap, 2);
    }

    #[tokio::test]
    async fn source_retraction_alone_stays_ok() {
        // the source pruned 102; the store holding it is not drift
        let m = monitor(
            store_with_ordinals(&[101, 102, 103]),
            FakeSource::with_ordinals(&[101, 103]),
        );
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.unexpected_in_store, vec![102]);
        assert!(report.missing_in_store.is_empty());
    }

    #[tokio::test]
    async fn other_sources_do_not_skew_the_comparison() {
        let store = store_with_ordinals(&[101, 102, 103]);
        // a second source's ordinals live in their own number space
        let device = store.get_or_create_device("MIRROR", None, None).unwrap();
        let subject = store
            .resolve_subject(&SubjectKey::employee_no("E-1"))
            .unwrap()
            .unwrap();
        let ts = sql_ts(Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());
        store
            .try_insert_admission(&NewAdmission {
                device_id: &device.id,
                subject_id: &subject.id,
                kind: "CLEARANCE_OK",
                occurred_at: &ts,
                received_at: &ts,
                dedup_key: "mirror-999",
                ordinal: Some(999),
                source_id: Some("mirror"),
                disposition: "ACCEPTED",
                reject_reason: None,
                clearance_result: Some("passed"),
                payload: "null",
            })
            .unwrap();

        let m = monitor(store, FakeSource::with_ordinals(&[101, 102, 103]));
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.store_latest, vec![103, 102, 101]);
    }

    #[tokio::test]
    async fn source_failure_reports_error_status() {
        let source = FakeSource::with_ordinals(&[101]);
        *source.fail.lock() = true;
        let m = monitor(store_with_ordinals(&[101]), source);
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn empty_store_and_source_is_ok() {
        let m = monitor(
            Arc::new(AdmissionStore::in_memory().unwrap()),
            FakeSource::with_ordinals(&[]),
        );
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.latest_gap, 0);
    }
}
