//! MLflow REST API client.
//!
//! Talks to the `/api/2.0/mlflow/` endpoints of an MLflow tracking server
//! using blocking HTTP requests.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::TrackingClient;
use crate::config::{Auth, TrackerConfig};
use crate::error::{Result, TrackingError};
use crate::types::{Metric, Param, RunInfo, RunStatus};

const API_PREFIX: &str = "api/2.0/mlflow";
const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const RUN_NAME_TAG: &str = "mlflow.runName";

/// Blocking client for an MLflow tracking server.
pub struct RestClient {
    http: Client,
    base_url: Option<String>,
    auth: Auth,
}

impl RestClient {
    /// Create a client with the given credentials and request timeout.
    ///
    /// No destination is set until [`TrackingClient::set_tracking_uri`] is called.
    pub fn new(auth: Auth, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, auth))
    }

    /// Create a client around a preconfigured HTTP client.
    pub fn with_client(http: Client, auth: Auth) -> Self {
        Self {
            http,
            base_url: None,
            auth,
        }
    }

    /// Create a client with the credentials and timeout from `config`.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::new(config.auth.clone(), config.timeout())
    }

    /// The tracking URI this client currently writes to.
    pub fn tracking_uri(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        let base = self.base_url.as_deref().ok_or(TrackingError::NoTrackingUri)?;
        Ok(format!("{}/{}/{}", base, API_PREFIX, path))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Bearer { token } => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("GET {url}");
        let response = self.authorize(self.http.get(&url).query(query)).send()?;
        decode_response(response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("POST {url}");
        let response = self.authorize(self.http.post(&url).json(body)).send()?;
        decode_response(response)
    }
}

/// Check that `uri` is an http(s) URL and normalize away trailing slashes.
fn normalize_uri(uri: &str) -> Result<String> {
    let parsed = Url::parse(uri).map_err(|_| TrackingError::UnsupportedUri(uri.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(uri.trim_end_matches('/').to_string()),
        _ => Err(TrackingError::UnsupportedUri(uri.to_string())),
    }
}

fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text()?;

    if !status.is_success() {
        return Err(api_error(status.as_u16(), &body));
    }

    if body.trim().is_empty() {
        Ok(serde_json::from_str("{}")?)
    } else {
        Ok(serde_json::from_str(&body)?)
    }
}

/// Build an API error from an MLflow error body, falling back to the raw text.
fn api_error(status: u16, body: &str) -> TrackingError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error_code: Some(error_code),
            message,
        }) => TrackingError::Api {
            status,
            error_code,
            message: message.unwrap_or_default(),
        },
        _ => TrackingError::Api {
            status,
            error_code: "UNKNOWN".to_string(),
            message: body.to_string(),
        },
    }
}

fn is_missing(err: &TrackingError) -> bool {
    matches!(
        err,
        TrackingError::Api { status, error_code, .. }
            if *status == 404 || error_code == RESOURCE_DOES_NOT_EXIST
    )
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentBody,
}

#[derive(Deserialize)]
struct ExperimentBody {
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: Option<String>,
}

#[derive(Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Serialize)]
struct Tag<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_name: Option<&'a str>,
    tags: Vec<Tag<'a>>,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunBody,
}

#[derive(Deserialize)]
struct RunBody {
    info: RunInfo,
}

#[derive(Serialize)]
struct LogMetricRequest<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    metric: &'a Metric,
}

#[derive(Serialize)]
struct LogParamRequest<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    param: &'a Param,
}

#[derive(Serialize)]
struct UpdateRunRequest<'a> {
    run_id: &'a str,
    status: RunStatus,
    end_time: i64,
}

#[derive(Deserialize)]
struct UpdateRunResponse {
    run_info: RunInfo,
}

// ============================================================================
// TrackingClient
// ============================================================================

impl TrackingClient for RestClient {
    fn set_tracking_uri(&mut self, uri: &str) -> Result<()> {
        self.base_url = Some(normalize_uri(uri)?);
        Ok(())
    }

    fn set_experiment(&self, name: &str) -> Result<String> {
        let lookup: Result<GetExperimentResponse> =
            self.get("experiments/get-by-name", &[("experiment_name", name)]);

        match lookup {
            Ok(found) => {
                if found.experiment.lifecycle_stage.as_deref() == Some("deleted") {
                    return Err(TrackingError::DeletedExperiment(name.to_string()));
                }
                Ok(found.experiment.experiment_id)
            }
            Err(e) if is_missing(&e) => {
                let created: CreateExperimentResponse =
                    self.post("experiments/create", &CreateExperimentRequest { name })?;
                info!("Created experiment '{}' ({})", name, created.experiment_id);
                Ok(created.experiment_id)
            }
            Err(e) => Err(e),
        }
    }

    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
    ) -> Result<RunInfo> {
        let tags = run_name
            .map(|value| Tag {
                key: RUN_NAME_TAG,
                value,
            })
            .into_iter()
            .collect();

        let request = CreateRunRequest {
            experiment_id,
            start_time,
            run_name,
            tags,
        };
        let response: CreateRunResponse = self.post("runs/create", &request)?;
        Ok(response.run.info)
    }

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()> {
        let _: Empty = self.post("runs/log-metric", &LogMetricRequest { run_id, metric })?;
        Ok(())
    }

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()> {
        let _: Empty = self.post("runs/log-parameter", &LogParamRequest { run_id, param })?;
        Ok(())
    }

    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo> {
        let request = UpdateRunRequest {
            run_id,
            status,
            end_time,
        };
        let response: UpdateRunResponse = self.post("runs/update", &request)?;
        Ok(response.run_info)
    }
}
