//! Tracking backend clients.

mod rest;

pub use rest::RestClient;

use crate::error::Result;
use crate::types::{Metric, Param, RunInfo, RunStatus};

/// Handle to an experiment-tracking backend.
///
/// Every write is issued synchronously; implementations do not buffer,
/// batch or retry.
pub trait TrackingClient {
    /// Point the client at a tracking destination.
    fn set_tracking_uri(&mut self, uri: &str) -> Result<()>;

    /// Resolve an experiment by name, creating it if missing, and return its id.
    fn set_experiment(&self, name: &str) -> Result<String>;

    /// Create a run in `experiment_id`. `start_time` is in epoch milliseconds.
    fn create_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        start_time: i64,
    ) -> Result<RunInfo>;

    fn log_metric(&self, run_id: &str, metric: &Metric) -> Result<()>;

    fn log_param(&self, run_id: &str, param: &Param) -> Result<()>;

    /// Set the status of a run. `end_time` is in epoch milliseconds.
    fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> Result<RunInfo>;
}
