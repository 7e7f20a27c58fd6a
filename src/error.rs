//! Error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("tracking server returned {status} ({error_code}): {message}")]
    Api {
        status: u16,
        error_code: String,
        message: String,
    },

    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Gpu(#[from] crate::metrics::GpuError),

    #[error("no tracking URI configured")]
    NoTrackingUri,

    #[error("unsupported tracking URI '{0}': expected http:// or https://")]
    UnsupportedUri(String),

    #[error("experiment '{0}' has been deleted; restore it or pick another name")]
    DeletedExperiment(String),

    #[error("no active run; call start_run first")]
    NoActiveRun,

    #[error("run {0} is already active; end it before starting another")]
    RunAlreadyActive(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}
