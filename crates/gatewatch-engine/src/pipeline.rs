//! The admission pipeline: every event, push or pull, goes through
//! `submit` / `submit_batch` and nowhere else.
//!
//! Decision order: structural validation → device resolution → subject
//! resolution → debounce (push only) → clearance policy → atomic
//! insert. Unresolvable events are dropped and counted, never guessed;
//! policy failures are persisted as rejections so the occurrence stays
//! auditable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use gatewatch_core::{
    ClearanceResult, EventKind, NormalizedEvent, SubjectKey, parse_sql_ts, sql_ts,
};
use gatewatch_settings::{Direction, GatewatchSettings};
use gatewatch_store::{AdmissionRow, AdmissionStore, DeviceRow, InsertOutcome, NewAdmission};

use crate::debounce::DebounceFilter;
use crate::enrich::ClearanceDetail;
use crate::errors::{EngineError, Result};
use crate::metrics::{
    EVENTS_ADMITTED_TOTAL, EVENTS_DROPPED_TOTAL, EVENTS_DUPLICATE_TOTAL, EVENTS_REJECTED_TOTAL,
    EVENTS_UNKNOWN_SOURCE_TOTAL, EVENTS_UNMATCHED_TOTAL,
};
use crate::outcome::{BatchOutcome, Outcome, reason};
use crate::policy::ClearancePolicy;

/// Free-text fallback when a device code is absent from the static
/// table. The authoritative mapping is the settings device table;
/// this only inspects vendor descriptor text.
fn descriptor_direction(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("entry") {
        Some("in")
    } else if lower.contains("exit") {
        Some("out")
    } else {
        None
    }
}

fn device_name(payload: &Value) -> Option<&str> {
    payload.get("deviceName").and_then(Value::as_str)
}

/// For clearance kinds, normalize the payload into structured detail
/// and surface the result column; other kinds keep the payload opaque.
fn clearance_fields(event: &NormalizedEvent) -> (Option<&'static str>, String) {
    if event.kind.is_clearance() {
        let default = if event.kind == EventKind::ClearanceOk {
            ClearanceResult::Passed
        } else {
            ClearanceResult::Failed
        };
        let detail = ClearanceDetail::from_payload(&event.payload, default);
        (Some(detail.result.as_sql()), detail.to_payload().to_string())
    } else {
        (None, event.payload.to_string())
    }
}

/// The admission pipeline. Cheap to clone per task via the shared store.
pub struct AdmissionPipeline {
    store: Arc<AdmissionStore>,
    policy: ClearancePolicy,
    debounce: DebounceFilter,
    device_directions: HashMap<String, Direction>,
    provision_subjects: bool,
}

impl AdmissionPipeline {
    /// Build a pipeline over `store` configured from settings.
    pub fn new(store: Arc<AdmissionStore>, settings: &GatewatchSettings) -> Self {
        let device_directions = settings
            .devices
            .iter()
            .map(|d| (d.code.clone(), d.direction))
            .collect();
        Self {
            store,
            policy: ClearancePolicy::from_hours(settings.policy.clearance_window_hours),
            debounce: DebounceFilter::from_seconds(settings.debounce.window_seconds),
            device_directions,
            provision_subjects: settings.provision_subjects_from_pull,
        }
    }

    /// The shared store underneath the pipeline.
    pub fn store(&self) -> &Arc<AdmissionStore> {
        &self.store
    }

    fn direction_for(&self, code: &str, descriptor: Option<&str>) -> Option<&'static str> {
        if let Some(dir) = self.device_directions.get(code) {
            return Some(dir.as_str());
        }
        descriptor.and_then(descriptor_direction)
    }

    /// Accepted clearance-ok times per subject, pre-parsed, covering
    /// every window that ends in `[earliest, latest]`.
    fn clearance_times(
        &self,
        subject_ids: &[&str],
        earliest: DateTime<Utc>,
        latest: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<DateTime<Utc>>>> {
        let from = sql_ts(earliest - self.policy.window());
        let to = sql_ts(latest);
        let raw = self.store.clearances_in_window(subject_ids, &from, &to)?;
        Ok(raw
            .into_iter()
            .map(|(subject_id, times)| {
                let parsed = times.iter().filter_map(|t| parse_sql_ts(t)).collect();
                (subject_id, parsed)
            })
            .collect())
    }

    /// Admit one push event.
    #[instrument(skip(self, event), fields(
        device = %event.device_code,
        kind = %event.kind,
        dedup_key = %event.dedup_key,
    ))]
    pub fn submit(&self, event: &NormalizedEvent) -> Result<Outcome> {
        if event.dedup_key.trim().is_empty() {
            counter!(EVENTS_DROPPED_TOTAL).increment(1);
            return Err(EngineError::Validation("dedup key must not be empty".into()));
        }
        let received_at = Utc::now();
        let occurred_at = event.occurred_at.unwrap_or(received_at);

        let name = device_name(&event.payload);
        let device = self.store.get_or_create_device(
            &event.device_code,
            name,
            self.direction_for(&event.device_code, name),
        )?;
        if !device.active {
            counter!(EVENTS_UNKNOWN_SOURCE_TOTAL).increment(1);
            warn!(device = %event.device_code, "event from deactivated device dropped");
            return Ok(Outcome::Dropped {
                reason: reason::DEVICE_NOT_REGISTERED,
            });
        }

        let Some(subject) = self.store.resolve_subject(&event.subject)? else {
            counter!(EVENTS_UNMATCHED_TOTAL).increment(1);
            warn!(subject = %event.subject, "event subject unresolved, dropped");
            return Ok(Outcome::Dropped {
                reason: reason::SUBJECT_NOT_FOUND,
            });
        };

        if let Some(prior) = self.debounce.prior_record(
            &self.store,
            &device.id,
            &subject.id,
            event.kind,
            occurred_at,
        )? {
            counter!(EVENTS_DUPLICATE_TOTAL).increment(1);
            debug!(prior = %prior.id, "candidate debounced against prior record");
            return Ok(Outcome::Duplicate { record: prior });
        }

        let (disposition, reject_reason) = if event.kind.requires_clearance() {
            let by_subject =
                self.clearance_times(&[subject.id.as_str()], occurred_at, occurred_at)?;
            let times = by_subject
                .get(subject.id.as_str())
                .cloned()
                .unwrap_or_default();
            if self.policy.authorizes(event.kind, occurred_at, &times) {
                ("ACCEPTED", None)
            } else {
                ("REJECTED", Some(reason::NO_RECENT_CLEARANCE))
            }
        } else {
            ("ACCEPTED", None)
        };

        let (clearance_result, payload) = clearance_fields(event);
        let occurred_sql = sql_ts(occurred_at);
        let received_sql = sql_ts(received_at);
        let inserted = self.store.try_insert_admission(&NewAdmission {
            device_id: &device.id,
            subject_id: &subject.id,
            kind: event.kind.as_sql(),
            occurred_at: &occurred_sql,
            received_at: &received_sql,
            dedup_key: &event.dedup_key,
            ordinal: event.ordinal,
            source_id: event.source_id.as_deref(),
            disposition,
            reject_reason,
            clearance_result,
            payload: &payload,
        })?;

        Ok(match inserted {
            InsertOutcome::Inserted(record) => match reject_reason {
                Some(why) => {
                    counter!(EVENTS_REJECTED_TOTAL).increment(1);
                    Outcome::Rejected {
                        record,
                        reason: why.to_string(),
                    }
                }
                None => {
                    counter!(EVENTS_ADMITTED_TOTAL).increment(1);
                    Outcome::Accepted { record }
                }
            },
            InsertOutcome::AlreadyExists(record) => {
                counter!(EVENTS_DUPLICATE_TOTAL).increment(1);
                Outcome::Duplicate { record }
            }
        })
    }

    /// Admit a pull-source batch in one transaction.
    ///
    /// Resolution is batched: at most one query per key shape for
    /// subjects, one per device for dedup keys, one for all clearance
    /// windows. If the transaction cannot commit, nothing is persisted
    /// and every undecided item reports `TransientError` so the caller
    /// retries the whole batch.
    #[instrument(skip(self, events), fields(batch_len = events.len()))]
    pub fn submit_batch(&self, events: &[NormalizedEvent]) -> Result<Vec<BatchOutcome>> {
        let mut outcomes: Vec<Option<Outcome>> = vec![None; events.len()];
        for (i, ev) in events.iter().enumerate() {
            if ev.dedup_key.trim().is_empty() {
                outcomes[i] = Some(Outcome::Dropped {
                    reason: reason::MISSING_DEDUP_KEY,
                });
            }
        }

        let received_at = Utc::now();
        if let Err(err) = self.admit_batch_inner(events, &mut outcomes, received_at) {
            warn!(error = %err, "batch admission failed, reporting transient for all items");
            for slot in &mut outcomes {
                if slot.is_none() {
                    *slot = Some(Outcome::TransientError {
                        reason: err.to_string(),
                    });
                }
            }
        }

        let mut admitted = 0;
        let mut rejected = 0;
        let mut duplicates = 0;
        let mut unmatched = 0;
        let mut unknown_source = 0;
        let mut dropped = 0;
        for outcome in outcomes.iter().flatten() {
            match outcome {
                Outcome::Accepted { .. } => admitted += 1,
                Outcome::Rejected { .. } => rejected += 1,
                Outcome::Duplicate { .. } => duplicates += 1,
                Outcome::Dropped { reason: why } => match *why {
                    reason::SUBJECT_NOT_FOUND => unmatched += 1,
                    reason::DEVICE_NOT_REGISTERED => unknown_source += 1,
                    _ => dropped += 1,
                },
                Outcome::TransientError { .. } => {}
            }
        }
        counter!(EVENTS_ADMITTED_TOTAL).increment(admitted);
        counter!(EVENTS_REJECTED_TOTAL).increment(rejected);
        counter!(EVENTS_DUPLICATE_TOTAL).increment(duplicates);
        counter!(EVENTS_UNMATCHED_TOTAL).increment(unmatched);
        counter!(EVENTS_UNKNOWN_SOURCE_TOTAL).increment(unknown_source);
        counter!(EVENTS_DROPPED_TOTAL).increment(dropped);

        Ok(events
            .iter()
            .zip(outcomes)
            .map(|(ev, outcome)| BatchOutcome {
                dedup_key: ev.dedup_key.clone(),
                outcome: outcome.unwrap_or_else(|| Outcome::TransientError {
                    reason: "batch item left undecided".to_string(),
                }),
            })
            .collect())
    }

    fn admit_batch_inner(
        &self,
        events: &[NormalizedEvent],
        outcomes: &mut [Option<Outcome>],
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let pending: Vec<usize> = (0..events.len()).filter(|&i| outcomes[i].is_none()).collect();
        if pending.is_empty() {
            return Ok(());
        }

        // Devices, one get-or-create per distinct code.
        let mut devices: HashMap<&str, DeviceRow> = HashMap::new();
        for &i in &pending {
            let ev = &events[i];
            if !devices.contains_key(ev.device_code.as_str()) {
                let name = device_name(&ev.payload);
                let row = self.store.get_or_create_device(
                    &ev.device_code,
                    name,
                    self.direction_for(&ev.device_code, name),
                )?;
                let _ = devices.insert(ev.device_code.as_str(), row);
            }
        }
        for &i in &pending {
            if !devices[events[i].device_code.as_str()].active {
                outcomes[i] = Some(Outcome::Dropped {
                    reason: reason::DEVICE_NOT_REGISTERED,
                });
            }
        }

        // Subjects, batched by key shape.
        let keys: Vec<SubjectKey> = {
            let mut seen = HashSet::new();
            pending
                .iter()
                .filter(|&&i| outcomes[i].is_none())
                .map(|&i| events[i].subject.clone())
                .filter(|k| seen.insert(k.clone()))
                .collect()
        };
        let mut subjects = self.store.resolve_subjects(&keys)?;
        if self.provision_subjects {
            for key in &keys {
                if subjects.contains_key(key) {
                    continue;
                }
                // Only clearance records may bring a new person into the
                // store; pass events for an unknown card stay dropped.
                let clearance_backed = pending.iter().any(|&i| {
                    outcomes[i].is_none()
                        && events[i].subject == *key
                        && events[i].kind.is_clearance()
                });
                if !clearance_backed {
                    continue;
                }
                let row = match key {
                    SubjectKey::EmployeeNo { no } => {
                        self.store.create_subject(Some(no), None, None)?
                    }
                    SubjectKey::External { system, id } => {
                        self.store.create_subject(None, None, Some((system, id)))?
                    }
                };
                debug!(subject = %key, "provisioned subject from pull source");
                let _ = subjects.insert(key.clone(), row);
            }
        }
        for &i in &pending {
            if outcomes[i].is_none() && !subjects.contains_key(&events[i].subject) {
                outcomes[i] = Some(Outcome::Dropped {
                    reason: reason::SUBJECT_NOT_FOUND,
                });
            }
        }

        let live: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|&i| outcomes[i].is_none())
            .collect();

        // One clearance query spanning every gated event's window; the
        // pure policy check re-filters per event.
        let gated: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| events[i].kind.requires_clearance())
            .collect();
        let mut clearance_times: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        if !gated.is_empty() {
            let times: Vec<DateTime<Utc>> = gated
                .iter()
                .map(|&i| events[i].occurred_at.unwrap_or(received_at))
                .collect();
            let earliest = times.iter().min().copied().unwrap_or(received_at);
            let latest = times.iter().max().copied().unwrap_or(received_at);
            let subject_ids: Vec<&str> = {
                let mut seen = HashSet::new();
                gated
                    .iter()
                    .map(|&i| subjects[&events[i].subject].id.as_str())
                    .filter(|s| seen.insert(*s))
                    .collect()
            };
            clearance_times = self.clearance_times(&subject_ids, earliest, latest)?;
        }

        // Pre-fetch committed dedup keys, one query per device.
        let mut by_device: HashMap<&str, Vec<&str>> = HashMap::new();
        for &i in &live {
            by_device
                .entry(events[i].device_code.as_str())
                .or_default()
                .push(events[i].dedup_key.as_str());
        }
        let mut known: HashMap<(String, String), AdmissionRow> = HashMap::new();
        for (code, dedup_keys) in &by_device {
            let device_id = devices[code].id.clone();
            for (key, row) in self.store.get_by_dedup_many(&device_id, dedup_keys)? {
                let _ = known.insert((device_id.clone(), key), row);
            }
        }

        struct Staged {
            idx: usize,
            device_id: String,
            subject_id: String,
            kind: &'static str,
            occurred_at: String,
            received_at: String,
            dedup_key: String,
            ordinal: Option<i64>,
            source_id: Option<String>,
            disposition: &'static str,
            reject_reason: Option<&'static str>,
            clearance_result: Option<&'static str>,
            payload: String,
        }

        let received_sql = sql_ts(received_at);
        let mut staged: Vec<Staged> = Vec::new();
        for &i in &live {
            let ev = &events[i];
            let device = &devices[ev.device_code.as_str()];
            if let Some(prior) = known.get(&(device.id.clone(), ev.dedup_key.clone())) {
                outcomes[i] = Some(Outcome::Duplicate {
                    record: prior.clone(),
                });
                continue;
            }
            let subject = &subjects[&ev.subject];
            let occurred = ev.occurred_at.unwrap_or(received_at);
            let (disposition, reject_reason) = if ev.kind.requires_clearance() {
                let times = clearance_times
                    .get(subject.id.as_str())
                    .cloned()
                    .unwrap_or_default();
                if self.policy.authorizes(ev.kind, occurred, &times) {
                    ("ACCEPTED", None)
                } else {
                    ("REJECTED", Some(reason::NO_RECENT_CLEARANCE))
                }
            } else {
                ("ACCEPTED", None)
            };
            let (clearance_result, payload) = clearance_fields(ev);
            staged.push(Staged {
                idx: i,
                device_id: device.id.clone(),
                subject_id: subject.id.clone(),
                kind: ev.kind.as_sql(),
                occurred_at: sql_ts(occurred),
                received_at: received_sql.clone(),
                dedup_key: ev.dedup_key.clone(),
                ordinal: ev.ordinal,
                source_id: ev.source_id.clone(),
                disposition,
                reject_reason,
                clearance_result,
                payload,
            });
        }

        if staged.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewAdmission<'_>> = staged
            .iter()
            .map(|s| NewAdmission {
                device_id: &s.device_id,
                subject_id: &s.subject_id,
                kind: s.kind,
                occurred_at: &s.occurred_at,
                received_at: &s.received_at,
                dedup_key: &s.dedup_key,
                ordinal: s.ordinal,
                source_id: s.source_id.as_deref(),
                disposition: s.disposition,
                reject_reason: s.reject_reason,
                clearance_result: s.clearance_result,
                payload: &s.payload,
            })
            .collect();
        let results = self.store.try_insert_batch(&rows)?;
        for (s, result) in staged.iter().zip(results) {
            outcomes[s.idx] = Some(match result {
                InsertOutcome::Inserted(record) => match s.reject_reason {
                    Some(why) => Outcome::Rejected {
                        record,
                        reason: why.to_string(),
                    },
                    None => Outcome::Accepted { record },
                },
                InsertOutcome::AlreadyExists(record) => Outcome::Duplicate { record },
            });
        }
        Ok(())
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
    use chrono::TimeZone;
    use gatewatch_store::{ConnectionConfig, new_in_memory, run_migrations};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, s).unwrap()
    }

    fn pipeline() -> (AdmissionPipeline, Arc<AdmissionStore>) {
        let store = Arc::new(AdmissionStore::in_memory().unwrap());
        store.create_subject(Some("E-1"), None, None).unwrap();
        let settings = GatewatchSettings::default();
        (AdmissionPipeline::new(Arc::clone(&store), &settings), store)
    }

    fn ev(kind: EventKind, key: &str, ts: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent::new("GATE_NORTH", SubjectKey::employee_no("E-1"), kind, key).at(ts)
    }

    #[test]
    fn shift_scenario() {
        let (pipeline, store) = pipeline();

        // 08:00 clearance passes
        let outcome = pipeline
            .submit(&ev(EventKind::ClearanceOk, "exam-1", at(8, 0, 0)))
            .unwrap();
        assert_matches!(outcome, Outcome::Accepted { .. });

        // 08:30 tool take, delivered twice
        let first = pipeline
            .submit(&ev(EventKind::ToolTake, "t-1", at(8, 30, 0)))
            .unwrap();
        let accepted = assert_matches!(first, Outcome::Accepted { record } => record);
        let second = pipeline
            .submit(&ev(EventKind::ToolTake, "t-1", at(8, 30, 0)))
            .unwrap();
        let prior = assert_matches!(second, Outcome::Duplicate { record } => record);
        assert_eq!(prior.id, accepted.id);
        assert_eq!(store.count_admissions().unwrap(), 2);

        // 15:30 tool take, clearance expired
        let late = pipeline
            .submit(&ev(EventKind::ToolTake, "t-2", at(15, 30, 0)))
            .unwrap();
        let (record, why) =
            assert_matches!(late, Outcome::Rejected { record, reason } => (record, reason));
        assert_eq!(why, reason::NO_RECENT_CLEARANCE);
        assert_eq!(record.disposition, "REJECTED");
        assert_eq!(store.count_admissions().unwrap(), 3);
    }

    #[test]
    fn clearance_window_boundaries() {
        let (pipeline, _store) = pipeline();
        pipeline
            .submit(&ev(EventKind::ClearanceOk, "exam-1", at(8, 0, 0)))
            .unwrap();

        // 5h59m after the clearance
        let inside = pipeline
            .submit(&ev(EventKind::GateIn, "g-1", at(13, 59, 0)))
            .unwrap();
        assert_matches!(inside, Outcome::Accepted { .. });

        // 6h01m after the clearance
        let outside = pipeline
            .submit(&ev(EventKind::GateIn, "g-2", at(14, 1, 0)))
            .unwrap();
        assert_matches!(outside, Outcome::Rejected { ref reason, .. }
            if reason == reason::NO_RECENT_CLEARANCE);
    }

    #[test]
    fn duplicate_of_rejection_reports_prior_disposition() {
        let (pipeline, store) = pipeline();
        let first = pipeline
            .submit(&ev(EventKind::GateIn, "g-1", at(9, 0, 0)))
            .unwrap();
        assert_matches!(first, Outcome::Rejected { .. });

        let again = pipeline
            .submit(&ev(EventKind::GateIn, "g-1", at(9, 0, 0)))
            .unwrap();
        let record = assert_matches!(again, Outcome::Duplicate { record } => record);
        assert_eq!(record.disposition, "REJECTED");
        assert_eq!(store.count_admissions().unwrap(), 1);
    }

    #[test]
    fn debounce_suppresses_refire_of_a_rejection() {
        let (pipeline, store) = pipeline();
        let first = pipeline
            .submit(&ev(EventKind::GateIn, "g-1", at(9, 0, 0)))
            .unwrap();
        assert_matches!(first, Outcome::Rejected { .. });

        // the gate re-fires 3 seconds later with a fresh nonce; still
        // the same refused pass, not a second auditable occurrence
        let refire = pipeline
            .submit(&ev(EventKind::GateIn, "g-2", at(9, 0, 3)))
            .unwrap();
        let record = assert_matches!(refire, Outcome::Duplicate { record } => record);
        assert_eq!(record.disposition, "REJECTED");
        assert_eq!(store.count_admissions().unwrap(), 1);
    }

    #[test]
    fn debounce_collapses_nearby_resends_with_fresh_keys() {
        let (pipeline, store) = pipeline();
        let first = pipeline
            .submit(&ev(EventKind::EntryPass, "sn-a", at(8, 0, 0)))
            .unwrap();
        assert_matches!(first, Outcome::Accepted { .. });

        // 3 seconds later, different serial
        let resend = pipeline
            .submit(&ev(EventKind::EntryPass, "sn-b", at(8, 0, 3)))
            .unwrap();
        let prior = assert_matches!(resend, Outcome::Duplicate { record } => record);
        assert_eq!(prior.dedup_key, "sn-a");

        // 25 seconds later: outside the 20s window, a real second pass
        let later = pipeline
            .submit(&ev(EventKind::EntryPass, "sn-c", at(8, 0, 25)))
            .unwrap();
        assert_matches!(later, Outcome::Accepted { .. });
        assert_eq!(store.count_admissions().unwrap(), 2);
    }

    #[test]
    fn unknown_subject_is_dropped_not_persisted() {
        let (pipeline, store) = pipeline();
        let outcome = pipeline
            .submit(&NormalizedEvent::new(
                "GATE_NORTH",
                SubjectKey::employee_no("ghost"),
                EventKind::EntryPass,
                "sn-1",
            ))
            .unwrap();
        assert_matches!(outcome, Outcome::Dropped { reason: reason::SUBJECT_NOT_FOUND });
        assert_eq!(store.count_admissions().unwrap(), 0);
    }

    #[test]
    fn deactivated_device_is_dropped() {
        let (pipeline, store) = pipeline();
        store.get_or_create_device("GATE_NORTH", None, None).unwrap();
        store.set_device_active("GATE_NORTH", false).unwrap();

        let outcome = pipeline
            .submit(&ev(EventKind::EntryPass, "sn-1", at(8, 0, 0)))
            .unwrap();
        assert_matches!(outcome, Outcome::Dropped { reason: reason::DEVICE_NOT_REGISTERED });
        assert_eq!(store.count_admissions().unwrap(), 0);
    }

    #[test]
    fn empty_dedup_key_is_a_validation_error() {
        let (pipeline, _store) = pipeline();
        let result = pipeline.submit(&NormalizedEvent::new(
            "GATE_NORTH",
            SubjectKey::employee_no("E-1"),
            EventKind::EntryPass,
            "  ",
        ));
        assert_matches!(result, Err(EngineError::Validation(_)));
    }

    #[test]
    fn batch_outcomes_correlate_by_dedup_key_in_order() {
        let (pipeline, _store) = pipeline();
        pipeline
            .submit(&ev(EventKind::ClearanceOk, "exam-1", at(7, 0, 0)))
            .unwrap();

        let batch = vec![
            ev(EventKind::EntryPass, "b-1", at(8, 0, 0)),
            ev(EventKind::GateIn, "b-2", at(8, 5, 0)),
            NormalizedEvent::new(
                "GATE_NORTH",
                SubjectKey::employee_no("ghost"),
                EventKind::EntryPass,
                "b-3",
            ),
        ];
        let outcomes = pipeline.submit_batch(&batch).unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].dedup_key, "b-1");
        assert_matches!(outcomes[0].outcome, Outcome::Accepted { .. });
        assert_eq!(outcomes[1].dedup_key, "b-2");
        assert_matches!(outcomes[1].outcome, Outcome::Accepted { .. });
        assert_eq!(outcomes[2].dedup_key, "b-3");
        assert_matches!(
            outcomes[2].outcome,
            Outcome::Dropped { reason: reason::SUBJECT_NOT_FOUND }
        );
    }

    #[test]
    fn batch_prefetch_reports_known_duplicates() {
        let (pipeline, store) = pipeline();
        pipeline
            .submit(&ev(EventKind::EntryPass, "dup", at(8, 0, 0)))
            .unwrap();

        let outcomes = pipeline
            .submit_batch(&[
                ev(EventKind::ExitPass, "dup", at(12, 0, 0)),
                ev(EventKind::ExitPass, "fresh", at(12, 0, 0)),
            ])
            .unwrap();
        assert_matches!(outcomes[0].outcome, Outcome::Duplicate { .. });
        assert_matches!(outcomes[1].outcome, Outcome::Accepted { .. });
        assert_eq!(store.count_admissions().unwrap(), 2);
    }

    #[test]
    fn batch_provisions_unknown_subject_for_clearance_records_only() {
        let store = Arc::new(AdmissionStore::in_memory().unwrap());
        let settings = GatewatchSettings {
            provision_subjects_from_pull: true,
            ..GatewatchSettings::default()
        };
        let pipeline = AdmissionPipeline::new(Arc::clone(&store), &settings);

        let outcomes = pipeline
            .submit_batch(&[
                NormalizedEvent::new(
                    "EXAM_PORTAL",
                    SubjectKey::employee_no("E-9"),
                    EventKind::ClearanceOk,
                    "exam-9",
                )
                .at(at(8, 0, 0))
                .with_ordinal(9),
                NormalizedEvent::new(
                    "GATE_NORTH",
                    SubjectKey::employee_no("E-8"),
                    EventKind::EntryPass,
                    "sn-8",
                ),
            ])
            .unwrap();

        assert_matches!(outcomes[0].outcome, Outcome::Accepted { .. });
        assert!(
            store
                .resolve_subject(&SubjectKey::employee_no("E-9"))
                .unwrap()
                .is_some()
        );
        // a bare pass event never provisions
        assert_matches!(
            outcomes[1].outcome,
            Outcome::Dropped { reason: reason::SUBJECT_NOT_FOUND }
        );
        assert!(
            store
                .resolve_subject(&SubjectKey::employee_no("E-8"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn batch_failure_reports_transient_for_every_item() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        let store = Arc::new(AdmissionStore::new(pool.clone()));
        store.create_subject(Some("E-1"), None, None).unwrap();
        let pipeline = AdmissionPipeline::new(Arc::clone(&store), &GatewatchSettings::default());

        pool.get()
            .unwrap()
            .execute_batch("DROP TABLE admissions")
            .unwrap();

        let outcomes = pipeline
            .submit_batch(&[
                ev(EventKind::EntryPass, "x-1", at(8, 0, 0)),
                ev(EventKind::EntryPass, "x-2", at(8, 0, 40)),
            ])
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_matches!(outcomes[0].outcome, Outcome::TransientError { .. });
        assert_matches!(outcomes[1].outcome, Outcome::TransientError { .. });
    }

    #[test]
    fn direction_resolution_prefers_table_over_descriptor() {
        use gatewatch_settings::DeviceEntry;
        let store = Arc::new(AdmissionStore::in_memory().unwrap());
        let settings = GatewatchSettings {
            devices: vec![DeviceEntry {
                code: "TS_9".to_string(),
                name: None,
                direction: Direction::Out,
            }],
            ..GatewatchSettings::default()
        };
        let pipeline = AdmissionPipeline::new(store, &settings);

        // table wins even when the descriptor says otherwise
        assert_eq!(pipeline.direction_for("TS_9", Some("Main Entry")), Some("out"));
        // descriptor fallback for unmapped codes
        assert_eq!(pipeline.direction_for("TS_X", Some("Main Entry")), Some("in"));
        assert_eq!(pipeline.direction_for("TS_X", Some("Exit lane 2")), Some("out"));
        assert_eq!(pipeline.direction_for("TS_X", Some("Turnstile")), None);
        assert_eq!(pipeline.direction_for("TS_X", None), None);
    }
}
