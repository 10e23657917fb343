//! # conduit-settings
//!
//! Layered configuration for the Conduit engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConduitSettings::default()`]
//! 2. **User file**: `~/.conduit/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `CONDUIT_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings cache. Swappable so a reload is visible to later readers
/// while earlier readers keep their snapshot.
static SETTINGS: RwLock<Option<Arc<ConduitSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// The first call loads from `~/.conduit/settings.json` with env overrides,
/// falling back to compiled defaults if loading fails.
pub fn get_settings() -> Arc<ConduitSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ConduitSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the global settings with a specific value.
pub fn init_settings(settings: ConduitSettings) {
    *SETTINGS.write() = Some(Arc::new(settings));
}

/// Reload settings from a specific file and swap the global cache.
///
/// A file that fails to load leaves defaults in place and logs a warning.
pub fn reload_settings_from_path(path: &Path) -> Arc<ConduitSettings> {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            ConduitSettings::default()
        }
    });
    *SETTINGS.write() = Some(Arc::clone(&new));
    tracing::info!(?path, "settings reloaded from disk");
    new
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
