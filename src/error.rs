use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a motion sample. Transient unless it repeats
/// `sensor_fault_limit` times in a row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorFault {
    #[error("Sensor read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed sensor reading: {0}")]
    Malformed(String),

    #[error("Sample source exhausted")]
    Exhausted,
}

/// Failure to obtain a position fix. Never fatal: dispatch goes ahead with
/// whatever fix is already known.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationFault {
    #[error("Location request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No satellite fix")]
    NoFix,

    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchFault {
    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Link error: {0}")]
    Link(String),
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model artifact not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model artifact is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Model artifact is structurally invalid: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to open recording {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recording is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}
