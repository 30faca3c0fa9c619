//! Settings loading: defaults → JSON file deep-merge → env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewatchSettings;

/// Default settings file location: `~/.gatewatch/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".gatewatch").join("settings.json")
}

/// Deep-merge `overlay` into `base`. Objects merge recursively; any
/// other value in the overlay replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path.
pub fn load_settings() -> Result<GatewatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path: compiled defaults, deep-merged
/// file contents (if the file exists), then `GATEWATCH_*` env overrides,
/// then validation.
pub fn load_settings_from_path(path: &Path) -> Result<GatewatchSettings> {
    let defaults = serde_json::to_value(GatewatchSettings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        debug!(?path, "settings file loaded");
        deep_merge(defaults, file_value)
    } else {
        defaults
    };

    let mut settings: GatewatchSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Apply `GATEWATCH_*` environment overrides (highest priority).
fn apply_env_overrides(settings: &mut GatewatchSettings) {
    if let Some(hours) = env_i64("GATEWATCH_CLEARANCE_WINDOW_HOURS") {
        settings.policy.clearance_window_hours = hours;
    }
    if let Some(secs) = env_i64("GATEWATCH_DEBOUNCE_SECONDS") {
        settings.debounce.window_seconds = secs;
    }
    if let Some(secs) = env_u64("GATEWATCH_POLL_INTERVAL_SECONDS") {
        settings.sync.poll_interval_seconds = secs;
    }
    if let Some(secs) = env_u64("GATEWATCH_MONITOR_INTERVAL_SECONDS") {
        settings.monitor.interval_seconds = secs;
    }
    if let Some(n) = env_u64("GATEWATCH_MONITOR_SAMPLE_SIZE") {
        settings.monitor.sample_size = n as usize;
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Startup validation. Catches misconfiguration before any loop starts.
fn validate(settings: &GatewatchSettings) -> Result<()> {
    if settings.policy.clearance_window_hours <= 0 {
        return Err(SettingsError::Invalid(
            "policy.clearanceWindowHours must be positive".into(),
        ));
    }
    if settings.debounce.window_seconds < 0 {
        return Err(SettingsError::Invalid(
            "debounce.windowSeconds must not be negative".into(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for entry in &settings.devices {
        if entry.code.trim().is_empty() {
            return Err(SettingsError::Invalid("device code must not be empty".into()));
        }
        if !seen.insert(entry.code.as_str()) {
            return Err(SettingsError::Invalid(format!(
                "duplicate device code: {}",
                entry.code
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
