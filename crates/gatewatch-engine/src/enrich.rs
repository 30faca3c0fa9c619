//! Clearance detail enrichment.
//!
//! Exam portals publish records before the exam concludes: the first
//! scrape may carry no result and no vitals, a later scrape fills them
//! in. Merging is strictly one-directional; a later read may fill
//! blanks and upgrade uncertainty to a concrete result, but can never
//! overwrite a concrete `Passed`/`Failed` or erase a vital already
//! recorded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gatewatch_core::ClearanceResult;

/// Structured clearance detail carried in admission payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearanceDetail {
    /// Exam result.
    pub result: ClearanceResult,
    /// Systolic blood pressure, mmHg.
    pub systolic: Option<i64>,
    /// Diastolic blood pressure, mmHg.
    pub diastolic: Option<i64>,
    /// Pulse, bpm.
    pub pulse: Option<i64>,
    /// Body temperature, °C.
    pub temperature: Option<f64>,
    /// Breath alcohol, mg/L.
    pub alcohol_mg_l: Option<f64>,
}

impl Default for ClearanceDetail {
    fn default() -> Self {
        Self {
            result: ClearanceResult::Unknown,
            systolic: None,
            diastolic: None,
            pulse: None,
            temperature: None,
            alcohol_mg_l: None,
        }
    }
}

impl ClearanceDetail {
    /// Parse detail out of an opaque payload, falling back to
    /// `default_result` when the payload carries no parsable result.
    pub fn from_payload(payload: &Value, default_result: ClearanceResult) -> Self {
        let mut detail: Self = serde_json::from_value(payload.clone()).unwrap_or_default();
        let has_result = payload
            .get("result")
            .and_then(Value::as_str)
            .is_some_and(|s| s.parse::<ClearanceResult>().is_ok());
        if !has_result {
            detail.result = default_result;
        }
        detail
    }

    /// Serialize back into a payload value.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Merge a later read into an existing detail. Returns the merged
/// detail and whether anything changed.
///
/// Result precedence moves toward certainty only: an uncertain result
/// (`Unknown`/`UnderReview`) gives way to any concrete conclusion,
/// passed or failed, and `Unknown` gives way to `UnderReview`. A
/// concrete `Passed`/`Failed` is terminal; flipping it takes an
/// operator, not a re-scrape.
pub fn merge(existing: &ClearanceDetail, update: &ClearanceDetail) -> (ClearanceDetail, bool) {
    let mut merged = existing.clone();

    let more_certain = update.result.is_concrete()
        || (existing.result == ClearanceResult::Unknown
            && update.result != ClearanceResult::Unknown);
    if !existing.result.is_concrete() && more_certain {
        merged.result = update.result;
    }
    merged.systolic = existing.systolic.or(update.systolic);
    merged.diastolic = existing.diastolic.or(update.diastolic);
    merged.pulse = existing.pulse.or(update.pulse);
    merged.temperature = existing.temperature.or(update.temperature);
    merged.alcohol_mg_l = existing.alcohol_mg_l.or(update.alcohol_mg_l);

    let changed = merged != *existing;
    (merged, changed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
