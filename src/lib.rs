//! Record system, GPU and model metrics for machine-learning runs into an
//! MLflow tracking server.
//!
//! ```no_run
//! use runwatch::{ExperimentTracker, TrackerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig::new("http://localhost:5000", "llm-inference");
//! let tracker = ExperimentTracker::from_config(&config)?;
//!
//! let run = tracker.start_run(Some("baseline"))?;
//! tracker.log_model_info("llama-3-8b", [("temperature", 0.7), ("top_p", 0.9)])?;
//! tracker.log_system_snapshot()?;
//! tracker.log_metrics([("latency_ms", 41.2), ("tokens_per_sec", 87.0)])?;
//! run.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tracker;
pub mod types;
pub mod utils;

pub use client::{RestClient, TrackingClient};
pub use config::{Auth, TrackerConfig};
pub use error::{ConfigError, Result, TrackingError};
pub use metrics::{GpuError, MetricsSource, SystemSource};
pub use tracker::{ActiveRun, ExperimentTracker, MODEL_NAME_PARAM};
pub use types::{
    GpuBackend, GpuInfo, GpuMetrics, HostMetrics, Metric, MetricValue, Param, RunInfo, RunStatus,
};
