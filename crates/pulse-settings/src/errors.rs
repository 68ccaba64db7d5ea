//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded or were rejected.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not JSON, or a field has the wrong type.
    #[error("invalid settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("compiled defaults do not round-trip: {0}")]
    Defaults(#[source] serde_json::Error),
    /// A value parsed but cannot be run with. `key` is the camelCase path.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// The offending key, for validation failures.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { key, .. } => Some(*key),
            _ => None,
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
        let source = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/pulse/settings.json"),
            source,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("invalid settings file /etc/pulse/settings.json:"));
        assert!(err.key().is_none());
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::invalid("bus.topic", "must not be empty");
        assert_eq!(err.to_string(), "invalid value for bus.topic: must not be empty");
        assert_eq!(err.key(), Some("bus.topic"));
    }

    #[test]
    fn read_error_keeps_io_source() {
        let err = SettingsError::Read {
            path: PathBuf::from("settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "denied");
    }
}
