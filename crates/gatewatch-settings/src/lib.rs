//! # gatewatch-settings
//!
//! Configuration management with layered sources for GateWatch.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**; [`GatewatchSettings::default()`]
//! 2. **File**; `~/.gatewatch/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**; `GATEWATCH_*` overrides (highest priority)
//!
//! The global singleton is reloadable: an operator config update swaps
//! the cached value so subsequent [`get_settings`] calls return fresh
//! data without restarting the loops.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<…>>>` instead of `OnceLock` so the cached value can
/// be swapped on reload. Reads are a shared lock + `Arc::clone`.
static SETTINGS: RwLock<Option<Arc<GatewatchSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// First call loads from disk with env overrides; later calls return the
/// cached `Arc`. Load failure falls back to compiled defaults.
pub fn get_settings() -> Arc<GatewatchSettings> {
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    // Double-check after acquiring the write lock.
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            GatewatchSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and process
/// startup where the settings path is known.
pub fn init_settings(settings: GatewatchSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            GatewatchSettings::default()
        }
    });
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that mutate the global static must hold this lock to avoid
    /// racing with each other.
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn reset() {
        let mut guard = SETTINGS.write().unwrap();
        *guard = None;
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = GatewatchSettings::default();
        assert_eq!(settings.policy.clearance_window_hours, 6);
        assert_eq!(settings.debounce.window_seconds, 20);
        assert_eq!(settings.sync.poll_interval_seconds, 60);
        assert_eq!(settings.monitor.sample_size, 25);
        assert!(settings.devices.is_empty());
        assert!(!settings.provision_subjects_from_pull);
    }

    #[test]
    fn init_settings_sets_custom_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset();
        let mut custom = GatewatchSettings::default();
        custom.policy.clearance_window_hours = 9;
        init_settings(custom);
        assert_eq!(get_settings().policy.clearance_window_hours, 9);
        reset();
    }

    #[test]
    fn reload_updates_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset();
        init_settings(GatewatchSettings::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"debounce": {"windowSeconds": 45}}"#).unwrap();

        reload_settings_from_path(&path);
        let updated = get_settings();
        assert_eq!(updated.debounce.window_seconds, 45);
        // deep merge preserves untouched defaults
        assert_eq!(updated.policy.clearance_window_hours, 6);
        reset();
    }
}
