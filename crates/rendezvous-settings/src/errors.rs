//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving the relay's settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or has the wrong shape.
    #[error("{} is not a valid settings file: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The merged settings could not be converted to or from JSON.
    #[error("settings do not round-trip through JSON: {0}")]
    Encode(#[from] serde_json::Error),
    /// A field holds a value the server cannot start with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// camelCase settings key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
