//! Settings schema: compiled defaults with serde deserialization.
//!
//! Every field has a default so a partial JSON file deep-merges cleanly
//! over [`GatewatchSettings::default()`].

use serde::{Deserialize, Serialize};

/// Top-level GateWatch settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewatchSettings {
    /// Authorization policy knobs.
    pub policy: PolicySettings,
    /// Push-path debounce filter knobs.
    pub debounce: DebounceSettings,
    /// Pull-source sync loop knobs.
    pub sync: SyncSettings,
    /// Consistency monitor knobs.
    pub monitor: MonitorSettings,
    /// Static device table: code → normalized direction.
    pub devices: Vec<DeviceEntry>,
    /// Whether pull-source clearance records may auto-provision unknown
    /// subjects (create a subject from the pass card). Push paths never
    /// provision.
    pub provision_subjects_from_pull: bool,
}

/// Authorization policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Lookback window (hours) within which a clearance-ok authorizes a
    /// gated action.
    pub clearance_window_hours: i64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            clearance_window_hours: 6,
        }
    }
}

/// Debounce filter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebounceSettings {
    /// Suppress push events for the same (device, subject, kind) within
    /// this many seconds of an already-accepted record.
    pub window_seconds: i64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self { window_seconds: 20 }
    }
}

/// Sync loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Seconds between ticks. Floored at 10 by the loop.
    pub poll_interval_seconds: u64,
    /// Maximum pages fetched past the checkpoint in one tick.
    pub max_pages: u32,
    /// Pages re-scanned from the top regardless of the checkpoint, to
    /// catch rows the source corrected or back-filled.
    pub recent_scan_pages: u32,
    /// Backoff floor after a fetch error (seconds).
    pub backoff_floor_seconds: u64,
    /// Backoff ceiling (seconds).
    pub backoff_ceiling_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            max_pages: 3,
            recent_scan_pages: 2,
            backoff_floor_seconds: 5,
            backoff_ceiling_seconds: 300,
        }
    }
}

/// Consistency monitor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// Seconds between checks. Floored at 60 by the timer.
    pub interval_seconds: u64,
    /// How many most-recent identifiers to compare.
    pub sample_size: usize,
    /// Page budget for the direct source read.
    pub max_pages: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            sample_size: 25,
            max_pages: 3,
        }
    }
}

/// One row of the static source-to-direction table.
///
/// Mapping devices by stable code here is the authoritative path;
/// free-text heuristics in the engine are a clearly separated fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    /// Stable device code, e.g. `GATE_NORTH_1`.
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Normalized direction for pass events from this device.
    pub direction: Direction,
}

/// Normalized direction for a pass device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Entering the hazard area.
    In,
    /// Leaving the hazard area.
    Out,
}

impl Direction {
    /// Lowercase string form used in storage and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}
