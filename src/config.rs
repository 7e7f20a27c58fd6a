//! Tracker configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_TRACKING_URI: &str = "MLFLOW_TRACKING_URI";
pub const ENV_EXPERIMENT_NAME: &str = "MLFLOW_EXPERIMENT_NAME";
pub const ENV_TOKEN: &str = "MLFLOW_TRACKING_TOKEN";
pub const ENV_USERNAME: &str = "MLFLOW_TRACKING_USERNAME";
pub const ENV_PASSWORD: &str = "MLFLOW_TRACKING_PASSWORD";
pub const ENV_TIMEOUT: &str = "MLFLOW_HTTP_REQUEST_TIMEOUT";

/// Where runs are recorded and how to reach the tracking server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub tracking_uri: String,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default)]
    pub auth: Auth,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Credentials sent with every request to the tracking server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Auth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: Option<String>,
    },
}

fn default_experiment_name() -> String {
    "Default".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl TrackerConfig {
    pub fn new(tracking_uri: impl Into<String>, experiment_name: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            experiment_name: experiment_name.into(),
            auth: Auth::None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Build a config from the standard `MLFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (environment, secrets store, ...).
    ///
    /// A token takes precedence over a username/password pair.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let tracking_uri = get(ENV_TRACKING_URI).ok_or(ConfigError::Missing(ENV_TRACKING_URI))?;
        let experiment_name = get(ENV_EXPERIMENT_NAME).unwrap_or_else(default_experiment_name);

        let auth = if let Some(token) = get(ENV_TOKEN) {
            Auth::Bearer { token }
        } else if let Some(username) = get(ENV_USERNAME) {
            Auth::Basic {
                username,
                password: get(ENV_PASSWORD),
            }
        } else {
            Auth::None
        };

        let timeout_secs = match get(ENV_TIMEOUT) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_TIMEOUT,
                value: raw,
            })?,
            None => default_timeout_secs(),
        };

        Ok(Self {
            tracking_uri,
            experiment_name,
            auth,
            timeout_secs,
        })
    }

    /// Load a config from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
