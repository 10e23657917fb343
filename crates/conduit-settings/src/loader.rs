//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ConduitSettings::default()`]
//! 2. If `~/.conduit/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CONDUIT_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ConduitSettings;

/// Resolve the path to the settings file (`~/.conduit/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conduit").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let defaults = serde_json::to_value(ConduitSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| parse_error(path, source))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ConduitSettings =
        serde_json::from_value(merged).map_err(|source| parse_error(path, source))?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn parse_error(path: &Path, source: serde_json::Error) -> SettingsError {
    SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    }
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut ConduitSettings) {
    // ── Exec settings ───────────────────────────────────────────────
    if let Some(v) = read_env_string("CONDUIT_SHELL") {
        settings.exec.shell = v;
    }
    if let Some(v) = read_env_u64("CONDUIT_EXEC_TIMEOUT_SECS", 0, 86_400) {
        settings.exec.default_timeout_secs = v;
    }
    if let Some(v) = read_env_usize("CONDUIT_EXEC_MAX_LINES", 1, 1_000_000) {
        settings.exec.max_lines = v;
    }
    if let Some(v) = read_env_string("CONDUIT_SPILL_DIR") {
        settings.exec.spill_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = read_env_bool("CONDUIT_SPILL_ENABLED") {
        settings.exec.spill_enabled = v;
    }

    // ── Delegate settings ───────────────────────────────────────────
    if let Some(v) = read_env_string("CONDUIT_AGENTS") {
        settings.delegate.agents = parse_list(&v);
    }
    if let Some(v) = read_env_u64("CONDUIT_TASK_TTL_SECS", 1, 604_800) {
        settings.delegate.task_ttl_secs = v;
    }
    if let Some(v) = read_env_usize("CONDUIT_MAX_TASKS", 1, 1_000_000) {
        settings.delegate.max_tasks = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = read_env_string("CONDUIT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("CONDUIT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
