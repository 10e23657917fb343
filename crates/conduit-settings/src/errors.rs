//! Why settings could not be loaded.

use std::path::PathBuf;

use thiserror::Error;

/// Settings loading failure. Each variant names the file or field at fault
/// so the message can be shown to the operator as is.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not JSON, or a value has the wrong type.
    #[error("settings file {} is malformed: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The compiled defaults did not serialize.
    #[error("default settings did not serialize: {0}")]
    Defaults(#[from] serde_json::Error),
    /// A value parsed but the engine cannot run with it.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Wire name of the setting, e.g. `exec.maxLines`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// An out-of-range or inconsistent value.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Wire name of the offending setting, when one is known.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Read { .. } | Self::Parse { .. } | Self::Defaults(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/conduit.json"),
            source,
        };
        assert!(err.to_string().starts_with("settings file /etc/conduit.json is malformed: "));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.field(), None);
    }

    #[test]
    fn invalid_names_the_field() {
        let err = SettingsError::invalid("exec.maxLines", "must be positive");
        assert_eq!(err.to_string(), "invalid setting exec.maxLines: must be positive");
        assert_eq!(err.field(), Some("exec.maxLines"));
    }
}
