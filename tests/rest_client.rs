//! End-to-end tests of the REST client and tracker against a fake MLflow server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use runwatch::{
    Auth, ExperimentTracker, GpuBackend, GpuInfo, GpuMetrics, HostMetrics, MetricsSource,
    RestClient, RunStatus, TrackingClient, TrackingError,
};

// ============================================================================
// Fake tracking server
// ============================================================================

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    body: Value,
    authorization: Option<String>,
}

#[derive(Clone, Default)]
struct FakeServer {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeServer {
    fn record(&self, path: &str, headers: &HeaderMap, body: Value) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            body,
            authorization,
        });
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .map(|r| r.body)
            .collect()
    }

    fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

async fn get_experiment(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let name = query.get("experiment_name").cloned().unwrap_or_default();
    server.record("experiments/get-by-name", &headers, json!({ "experiment_name": name.clone() }));

    let stage = match name.as_str() {
        "existing" => "active",
        "archived" => "deleted",
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error_code": "RESOURCE_DOES_NOT_EXIST",
                    "message": format!("Could not find experiment with name '{name}'"),
                })),
            )
                .into_response()
        }
    };

    Json(json!({
        "experiment": {
            "experiment_id": "1",
            "name": name,
            "artifact_location": "mlflow-artifacts:/1",
            "lifecycle_stage": stage,
        }
    }))
    .into_response()
}

async fn create_experiment(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    server.record("experiments/create", &headers, body);
    Json(json!({ "experiment_id": "2" }))
}

async fn create_run(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    server.record("runs/create", &headers, body.clone());
    let run_name = body
        .get("run_name")
        .cloned()
        .unwrap_or_else(|| json!("gentle-heron-17"));
    Json(json!({
        "run": {
            "info": {
                "run_id": "abc123",
                "run_uuid": "abc123",
                "run_name": run_name,
                "experiment_id": body["experiment_id"],
                "status": "RUNNING",
                "start_time": body["start_time"],
                "lifecycle_stage": "active",
            },
            "data": {}
        }
    }))
}

async fn log_metric(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    server.record("runs/log-metric", &headers, body.clone());
    if body["key"] == "boom" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error_code": "INVALID_PARAMETER_VALUE",
                "message": "Invalid metric name: 'boom'",
            })),
        )
            .into_response();
    }
    Json(json!({})).into_response()
}

async fn log_param(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    server.record("runs/log-parameter", &headers, body);
    Json(json!({}))
}

async fn update_run(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    server.record("runs/update", &headers, body.clone());
    Json(json!({
        "run_info": {
            "run_id": body["run_id"],
            "experiment_id": "2",
            "status": body["status"],
            "end_time": body["end_time"],
        }
    }))
}

/// Serve a fake tracking server on an ephemeral port; returns its base URI.
fn spawn_server() -> (String, FakeServer) {
    let server = FakeServer::default();
    let app = Router::new()
        .route("/api/2.0/mlflow/experiments/get-by-name", get(get_experiment))
        .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
        .route("/api/2.0/mlflow/runs/create", post(create_run))
        .route("/api/2.0/mlflow/runs/log-metric", post(log_metric))
        .route("/api/2.0/mlflow/runs/log-parameter", post(log_param))
        .route("/api/2.0/mlflow/runs/update", post(update_run))
        .with_state(server.clone());

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    (format!("http://{addr}"), server)
}

fn rest_client() -> RestClient {
    RestClient::new(Auth::None, Duration::from_secs(5)).unwrap()
}

struct FixedSource(Option<GpuMetrics>);

impl MetricsSource for FixedSource {
    fn host(&mut self) -> HostMetrics {
        HostMetrics {
            cpu_percent: 25.0,
            memory_percent: 50.0,
            memory_used: 8 << 30,
            memory_total: 16 << 30,
        }
    }

    fn gpus(&mut self) -> runwatch::Result<Option<GpuMetrics>> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn set_experiment_creates_missing_experiment() {
    let (uri, server) = spawn_server();
    let mut client = rest_client();
    client.set_tracking_uri(&uri).unwrap();

    let id = client.set_experiment("llm-eval").unwrap();

    assert_eq!(id, "2");
    assert_eq!(
        server.paths(),
        vec!["experiments/get-by-name", "experiments/create"]
    );
    assert_eq!(
        server.bodies("experiments/create"),
        vec![json!({ "name": "llm-eval" })]
    );
}

#[test]
fn set_experiment_reuses_existing_experiment() {
    let (uri, server) = spawn_server();
    let mut client = rest_client();
    client.set_tracking_uri(&uri).unwrap();

    assert_eq!(client.set_experiment("existing").unwrap(), "1");
    assert_eq!(server.paths(), vec!["experiments/get-by-name"]);
}

#[test]
fn set_experiment_rejects_deleted_experiment() {
    let (uri, _server) = spawn_server();
    let mut client = rest_client();
    client.set_tracking_uri(&uri).unwrap();

    match client.set_experiment("archived") {
        Err(TrackingError::DeletedExperiment(name)) => assert_eq!(name, "archived"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn tracker_session_against_server() {
    let (uri, server) = spawn_server();
    let gpus = GpuMetrics {
        gpus: vec![GpuInfo {
            index: 0,
            name: "NVIDIA A100".into(),
            utilization: Some(90),
            memory_used: 20,
            memory_total: 80,
        }],
        driver_version: "550.54".into(),
        api_version: "12.4".into(),
        backend: GpuBackend::Nvml,
    };
    let tracker =
        ExperimentTracker::with_source(rest_client(), FixedSource(Some(gpus)), &uri, "llm-eval")
            .unwrap();
    assert_eq!(tracker.experiment_id(), "2");

    let run = tracker.start_run(Some("baseline")).unwrap();
    assert_eq!(run.run_id(), "abc123");

    tracker
        .log_model_info("mistral-7b", [("temperature", 0.2), ("top_p", 0.95)])
        .unwrap();
    tracker.log_system_snapshot().unwrap();
    tracker
        .log_metrics([("latency_ms", 41.5), ("tokens_per_sec", 87.0)])
        .unwrap();

    let info = run.finish().unwrap();
    assert_eq!(info.status, RunStatus::Finished);

    let create = &server.bodies("runs/create")[0];
    assert_eq!(create["experiment_id"], "2");
    assert_eq!(create["run_name"], "baseline");
    assert_eq!(
        create["tags"],
        json!([{ "key": "mlflow.runName", "value": "baseline" }])
    );

    let params: Vec<(String, String)> = server
        .bodies("runs/log-parameter")
        .iter()
        .map(|b| {
            assert_eq!(b["run_id"], "abc123");
            (
                b["key"].as_str().unwrap().to_string(),
                b["value"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        params,
        vec![
            ("model_name".to_string(), "mistral-7b".to_string()),
            ("temperature".to_string(), "0.2".to_string()),
            ("top_p".to_string(), "0.95".to_string()),
        ]
    );

    let metrics: Vec<(String, f64)> = server
        .bodies("runs/log-metric")
        .iter()
        .map(|b| {
            assert_eq!(b["run_id"], "abc123");
            assert_eq!(b["step"], 0);
            assert!(b["timestamp"].as_i64().unwrap() > 0);
            (b["key"].as_str().unwrap().to_string(), b["value"].as_f64().unwrap())
        })
        .collect();
    assert_eq!(
        metrics,
        vec![
            ("cpu_percent".to_string(), 25.0),
            ("memory_percent".to_string(), 50.0),
            ("gpu_0_utilization".to_string(), 90.0),
            ("gpu_0_memory_percent".to_string(), 25.0),
            ("latency_ms".to_string(), 41.5),
            ("tokens_per_sec".to_string(), 87.0),
        ]
    );

    let update = &server.bodies("runs/update")[0];
    assert_eq!(update["run_id"], "abc123");
    assert_eq!(update["status"], "FINISHED");
    assert!(update["end_time"].as_i64().is_some());
}

#[test]
fn unnamed_run_omits_run_name() {
    let (uri, server) = spawn_server();
    let tracker =
        ExperimentTracker::with_source(rest_client(), FixedSource(None), &uri, "existing").unwrap();

    let run = tracker.start_run(None).unwrap();
    assert_eq!(run.info().run_name.as_deref(), Some("gentle-heron-17"));
    drop(run);

    let create = &server.bodies("runs/create")[0];
    assert!(create.get("run_name").is_none());
    assert_eq!(create["tags"], json!([]));
    assert_eq!(server.bodies("runs/update")[0]["status"], "FINISHED");
}

#[test]
fn local_system_snapshot_logs_host_metrics_first() {
    let (uri, server) = spawn_server();
    let tracker = ExperimentTracker::new(rest_client(), &uri, "existing").unwrap();
    let _run = tracker.start_run(Some("local")).unwrap();

    tracker.log_system_snapshot().unwrap();

    let keys: Vec<String> = server
        .bodies("runs/log-metric")
        .iter()
        .map(|b| b["key"].as_str().unwrap().to_string())
        .collect();
    assert!(keys.len() >= 2);
    assert_eq!(keys.len() % 2, 0);
    assert_eq!(keys[0], "cpu_percent");
    assert_eq!(keys[1], "memory_percent");
}

#[test]
fn server_errors_reach_the_caller() {
    let (uri, _server) = spawn_server();
    let tracker =
        ExperimentTracker::with_source(rest_client(), FixedSource(None), &uri, "existing").unwrap();
    let _run = tracker.start_run(None).unwrap();

    match tracker.log_metrics([("boom", 1.0)]) {
        Err(TrackingError::Api {
            status,
            error_code,
            message,
        }) => {
            assert_eq!(status, 400);
            assert_eq!(error_code, "INVALID_PARAMETER_VALUE");
            assert_eq!(message, "Invalid metric name: 'boom'");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn bearer_token_is_sent() {
    let (uri, server) = spawn_server();
    let mut client = RestClient::new(
        Auth::Bearer {
            token: "s3cret".into(),
        },
        Duration::from_secs(5),
    )
    .unwrap();
    client.set_tracking_uri(&uri).unwrap();

    client.set_experiment("existing").unwrap();

    assert_eq!(
        server.requests()[0].authorization.as_deref(),
        Some("Bearer s3cret")
    );
}

#[test]
fn unreachable_server_is_an_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = rest_client();
    client.set_tracking_uri(&format!("http://{addr}")).unwrap();

    assert!(matches!(
        client.set_experiment("existing"),
        Err(TrackingError::Http(_))
    ));
}

#[test]
fn non_http_uri_is_rejected_at_construction() {
    match ExperimentTracker::with_source(rest_client(), FixedSource(None), "file:///tmp/mlruns", "x")
    {
        Err(TrackingError::UnsupportedUri(uri)) => assert_eq!(uri, "file:///tmp/mlruns"),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("tracker accepted a file URI"),
    }
}
