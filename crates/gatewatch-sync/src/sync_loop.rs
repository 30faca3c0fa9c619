//! The checkpointed sync loop.
//!
//! One tokio task per source. Each tick merges a checkpointed fetch
//! with a bounded recent re-scan, pushes the merged batch through the
//! admission pipeline, enriches duplicates that came back with richer
//! clearance detail, runs a bounded repair pass, and only then advances
//! the high-water mark. A failed commit leaves the checkpoint untouched
//! so the next tick re-fetches the same span.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use gatewatch_core::{ClearanceResult, EventKind, NormalizedEvent, sql_ts};
use gatewatch_engine::metrics::{
    SYNC_FETCHED_TOTAL, SYNC_REPAIRED_TOTAL, SYNC_RUNS_TOTAL, SYNC_SAVED_TOTAL,
};
use gatewatch_engine::{
    AdmissionPipeline, ClearanceDetail, MetricsSink, Outcome, RunCounts, merge, reason,
};
use gatewatch_settings::SyncSettings;
use gatewatch_store::{AdmissionRow, AdmissionStore, EnrichUpdate};

use crate::errors::{Result, SyncError};
use crate::run_blocking;
use crate::source::PullSource;

/// Incomplete clearance records examined per repair pass.
const REPAIR_SCAN_LIMIT: usize = 25;

/// Where the loop currently is, for health surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting for the next tick.
    Idle,
    /// Reading from the source.
    Fetching,
    /// Pushing the batch through the pipeline.
    Applying,
    /// Sleeping out a fetch failure.
    Backoff,
}

/// Per-source sync task.
pub struct SyncLoop {
    pipeline: Arc<AdmissionPipeline>,
    source: Arc<dyn PullSource>,
    settings: SyncSettings,
    sink: Arc<dyn MetricsSink>,
    state: Arc<RwLock<LoopState>>,
}

impl SyncLoop {
    /// Build a loop over `pipeline` for one source.
    pub fn new(
        pipeline: Arc<AdmissionPipeline>,
        source: Arc<dyn PullSource>,
        settings: SyncSettings,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            pipeline,
            source,
            settings,
            sink,
            state: Arc::new(RwLock::new(LoopState::Idle)),
        }
    }

    /// The loop's current state.
    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    fn set_state(&self, state: LoopState) {
        *self.state.write() = state;
    }

    /// Spawn the loop as a tokio task. The task never terminates on
    /// error; cancel the token to stop it (an in-flight tick finishes
    /// first).
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    /// Drive ticks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let poll = Duration::from_secs(self.settings.poll_interval_seconds.max(10));
        let floor = self.settings.backoff_floor_seconds.max(1);
        let ceiling = self.settings.backoff_ceiling_seconds.max(floor);
        let mut backoff = floor;

        info!(source = self.source.source_id(), "sync loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = match self.tick().await {
                Ok(counts) => {
                    self.sink.record_run(&counts);
                    backoff = floor;
                    poll
                }
                Err(err) => {
                    warn!(
                        source = self.source.source_id(),
                        error = %err,
                        backoff_seconds = backoff,
                        "sync tick failed, backing off"
                    );
                    self.set_state(LoopState::Backoff);
                    let delay = Duration::from_secs(backoff);
                    backoff = (backoff * 2).min(ceiling);
                    delay
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.set_state(LoopState::Idle);
        info!(source = self.source.source_id(), "sync loop stopped");
    }

    /// Run one cycle now: fetch, apply, enrich, repair, checkpoint.
    ///
    /// Store I/O (and its busy-retry sleeps) runs on the blocking pool
    /// so a slow commit never starves this task's timer or the other
    /// loops sharing the runtime.
    #[instrument(skip(self), fields(source = self.source.source_id()))]
    pub async fn tick(&self) -> Result<RunCounts> {
        self.set_state(LoopState::Fetching);
        let source_id = self.source.source_id().to_string();

        let mark = {
            let store = Arc::clone(self.pipeline.store());
            let sid = source_id.clone();
            run_blocking(move || store.get_checkpoint(&sid)).await?
        }
        .map_or(0, |c| c.high_water_mark);

        let since = self
            .source
            .fetch_since(mark, self.settings.max_pages)
            .await?;
        let recent = if self.settings.recent_scan_pages > 0 {
            self.source.fetch_recent(self.settings.recent_scan_pages).await?
        } else {
            Vec::new()
        };

        // Merge by ordinal; the recent scan is fresher, so it wins on
        // collision. Ordinal-less rows cannot be checkpointed.
        let mut structural_drops = 0_u64;
        let mut by_ordinal: BTreeMap<i64, NormalizedEvent> = BTreeMap::new();
        for mut event in since.into_iter().chain(recent) {
            event.source_id = Some(source_id.clone());
            match event.ordinal {
                Some(ordinal) => {
                    let _ = by_ordinal.insert(ordinal, event);
                }
                None => {
                    structural_drops += 1;
                    debug!(source = %source_id, "dropped ordinal-less record");
                }
            }
        }
        let events: Vec<NormalizedEvent> = by_ordinal.into_values().collect();
        let fetched = events.len() as u64;
        let max_ordinal = events.iter().filter_map(|e| e.ordinal).max();

        self.set_state(LoopState::Applying);
        let (mut counts, enriched_ids) = {
            let pipeline = Arc::clone(&self.pipeline);
            run_blocking(move || {
                let outcomes = pipeline.submit_batch(&events)?;

                let mut counts = RunCounts {
                    fetched,
                    dropped: structural_drops,
                    ..RunCounts::default()
                };
                for item in &outcomes {
                    match &item.outcome {
                        Outcome::Accepted { .. } => counts.saved += 1,
                        Outcome::Rejected { .. } => counts.rejected += 1,
                        Outcome::Duplicate { .. } => counts.duplicates += 1,
                        Outcome::Dropped { reason: why } => match *why {
                            reason::SUBJECT_NOT_FOUND => counts.unmatched += 1,
                            reason::DEVICE_NOT_REGISTERED => counts.unknown_source += 1,
                            _ => counts.dropped += 1,
                        },
                        Outcome::TransientError { .. } => counts.transient += 1,
                    }
                }

                let mut enriched_ids = HashSet::new();
                for (event, item) in events.iter().zip(&outcomes) {
                    if let Outcome::Duplicate { record } = &item.outcome {
                        if event.kind.is_clearance()
                            && enrich_record(pipeline.store(), record, event)?
                        {
                            let _ = enriched_ids.insert(record.id.clone());
                            counts.repaired += 1;
                        }
                    }
                }
                Ok::<_, SyncError>((counts, enriched_ids))
            })
            .await?
        };

        // Repair is best-effort; a failure here must not hold the tick
        // (or the checkpoint) hostage.
        match self.repair_pass(&source_id, &enriched_ids).await {
            Ok(repaired) => counts.repaired += repaired,
            Err(err) => {
                warn!(source = %source_id, error = %err, "repair pass failed");
            }
        }

        // The checkpoint moves only when every staged row committed; a
        // transient batch is re-fetched whole next tick.
        if counts.transient == 0 {
            if let Some(max_ordinal) = max_ordinal {
                let store = Arc::clone(self.pipeline.store());
                let sid = source_id.clone();
                let mark =
                    run_blocking(move || store.advance_checkpoint(&sid, max_ordinal)).await?;
                debug!(source = %source_id, mark, "checkpoint advanced");
            }
        }

        counter!(SYNC_RUNS_TOTAL).increment(1);
        counter!(SYNC_FETCHED_TOTAL).increment(counts.fetched);
        counter!(SYNC_SAVED_TOTAL).increment(counts.saved);
        counter!(SYNC_REPAIRED_TOTAL).increment(counts.repaired);

        self.set_state(LoopState::Idle);
        Ok(counts)
    }

    /// Bounded re-merge of one source's clearance records still lacking
    /// a concrete result, using the source's detail endpoint.
    async fn repair_pass(&self, source_id: &str, already_enriched: &HashSet<String>) -> Result<u64> {
        let pending = {
            let store = Arc::clone(self.pipeline.store());
            let sid = source_id.to_string();
            run_blocking(move || store.incomplete_clearances(&sid, REPAIR_SCAN_LIMIT)).await?
        };

        let mut repaired = 0;
        for record in pending {
            if already_enriched.contains(&record.id) {
                continue;
            }
            let Some(ordinal) = record.ordinal else {
                continue;
            };
            let Some(detail) = self.source.fetch_detail(ordinal).await? else {
                continue;
            };
            if !detail.kind.is_clearance() {
                continue;
            }
            let store = Arc::clone(self.pipeline.store());
            if run_blocking(move || enrich_record(&store, &record, &detail)).await? {
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}

/// Merge richer clearance detail from `event` into the committed
/// `record`. Returns whether the record changed.
fn enrich_record(
    store: &AdmissionStore,
    record: &AdmissionRow,
    event: &NormalizedEvent,
) -> Result<bool> {
    let existing_result = record
        .clearance_result
        .as_deref()
        .and_then(|s| s.parse::<ClearanceResult>().ok())
        .unwrap_or(ClearanceResult::Unknown);
    let existing_payload =
        serde_json::from_str(&record.payload).unwrap_or(serde_json::Value::Null);
    let existing = ClearanceDetail::from_payload(&existing_payload, existing_result);

    let update_default = if event.kind == EventKind::ClearanceOk {
        ClearanceResult::Passed
    } else {
        ClearanceResult::Failed
    };
    let update = ClearanceDetail::from_payload(&event.payload, update_default);

    let (merged, detail_changed) = merge(&existing, &update);

    // A newly concrete result may correct the recorded kind.
    let kind_fix = match merged.result {
        ClearanceResult::Passed if record.kind != "CLEARANCE_OK" => Some("CLEARANCE_OK"),
        ClearanceResult::Failed if record.kind != "CLEARANCE_FAIL" => Some("CLEARANCE_FAIL"),
        _ => None,
    };
    // The source's occurrence time is authoritative for its rows.
    let occurred_fix = event
        .occurred_at
        .map(sql_ts)
        .filter(|ts| *ts != record.occurred_at);

    if !detail_changed && kind_fix.is_none() && occurred_fix.is_none() {
        return Ok(false);
    }

    let payload = merged.to_payload().to_string();
    store.enrich_admission(
        &record.id,
        &EnrichUpdate {
            kind: kind_fix,
            occurred_at: occurred_fix.as_deref(),
            clearance_result: Some(merged.result.as_sql()),
            payload: Some(&payload),
        },
    )?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
