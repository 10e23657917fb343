//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields keep their compiled default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConduitSettings {
    /// Subprocess runner.
    pub exec: ExecSettings,
    /// Delegation orchestrator.
    pub delegate: DelegateSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ConduitSettings {
    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.exec.shell.trim().is_empty() {
            return Err(SettingsError::invalid("exec.shell", "must not be empty"));
        }
        if self.exec.max_lines == 0 {
            return Err(SettingsError::invalid("exec.maxLines", "must be positive"));
        }
        if self.exec.max_line_bytes < MIN_LINE_BYTES {
            return Err(SettingsError::invalid(
                "exec.maxLineBytes",
                format!("must be at least {MIN_LINE_BYTES}"),
            ));
        }
        if self.exec.max_timeout_secs > 0
            && self.exec.default_timeout_secs > self.exec.max_timeout_secs
        {
            return Err(SettingsError::invalid(
                "exec.defaultTimeoutSecs",
                format!("exceeds exec.maxTimeoutSecs ({})", self.exec.max_timeout_secs),
            ));
        }
        if self.delegate.max_tasks == 0 {
            return Err(SettingsError::invalid("delegate.maxTasks", "must be positive"));
        }
        if self.delegate.bus_capacity == 0 {
            return Err(SettingsError::invalid("delegate.busCapacity", "must be positive"));
        }
        Ok(())
    }
}

/// Smallest accepted per-line cap.
pub const MIN_LINE_BYTES: usize = 1024;

/// Subprocess runner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecSettings {
    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
    /// Timeout applied when the call does not pass one. `0` disables it.
    pub default_timeout_secs: u64,
    /// Upper bound on any requested timeout. `0` means unbounded.
    pub max_timeout_secs: u64,
    /// Tail lines kept when output is truncated.
    pub max_lines: usize,
    /// Longest line kept in memory once output is past `max_lines`; a
    /// longer line keeps its tail. Output within `max_lines` is never cut.
    pub max_line_bytes: usize,
    /// Write the full output to a side file once it is truncated.
    pub spill_enabled: bool,
    /// Directory for side files. Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spill_dir: Option<PathBuf>,
    /// How long to keep draining the pipe after the process group is killed.
    pub drain_grace_ms: u64,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            default_timeout_secs: 120,
            max_timeout_secs: 3600,
            max_lines: 2000,
            max_line_bytes: 64 * 1024,
            spill_enabled: true,
            spill_dir: None,
            drain_grace_ms: 250,
        }
    }
}

impl ExecSettings {
    /// Resolved side-file directory.
    pub fn spill_dir(&self) -> PathBuf {
        self.spill_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Delegation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelegateSettings {
    /// Agent ids that may receive delegated work.
    pub agents: Vec<String>,
    /// How long finished tasks stay pollable.
    pub task_ttl_secs: u64,
    /// Capacity bound of the task store.
    pub max_tasks: usize,
    /// How long a synchronous run waits before returning a pollable snapshot.
    pub sync_timeout_secs: u64,
    /// Per-topic event buffer.
    pub bus_capacity: usize,
}

impl Default for DelegateSettings {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            task_ttl_secs: 3600,
            max_tasks: 1024,
            sync_timeout_secs: 600,
            bus_capacity: 64,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
