//! Experiment tracker: run creation and metric/parameter logging.

use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::client::{RestClient, TrackingClient};
use crate::config::TrackerConfig;
use crate::error::{Result, TrackingError};
use crate::metrics::{MetricsSource, SystemSource};
use crate::types::{Metric, MetricValue, Param, RunInfo, RunStatus};
use crate::utils::{self, format_memory, gpu_memory_key, gpu_utilization_key};

/// Parameter key under which [`ExperimentTracker::log_model_info`] records the model name.
pub const MODEL_NAME_PARAM: &str = "model_name";

/// Records system and model metrics for runs of one experiment.
///
/// The destination and experiment are fixed at construction. Logging
/// operations write to the run started by [`start_run`](Self::start_run);
/// each record is sent immediately with no buffering or retry.
pub struct ExperimentTracker<C, S = SystemSource> {
    client: C,
    source: Mutex<S>,
    experiment_name: String,
    experiment_id: String,
    active_run: Mutex<Option<String>>,
}

impl ExperimentTracker<RestClient, SystemSource> {
    /// Connect to the MLflow server described by `config`.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let client = RestClient::from_config(config)?;
        Self::new(client, &config.tracking_uri, &config.experiment_name)
    }
}

impl<C: TrackingClient> ExperimentTracker<C, SystemSource> {
    /// Configure `client` for `tracking_uri` and `experiment_name`, reading
    /// system metrics from the local machine.
    pub fn new(client: C, tracking_uri: &str, experiment_name: &str) -> Result<Self> {
        Self::with_source(client, SystemSource::new(), tracking_uri, experiment_name)
    }
}

impl<C: TrackingClient, S: MetricsSource> ExperimentTracker<C, S> {
    /// Configure `client` for `tracking_uri` and `experiment_name`, reading
    /// system metrics from `source`.
    pub fn with_source(
        mut client: C,
        source: S,
        tracking_uri: &str,
        experiment_name: &str,
    ) -> Result<Self> {
        client.set_tracking_uri(tracking_uri)?;
        let experiment_id = client.set_experiment(experiment_name)?;
        info!(
            "Tracking experiment '{}' ({}) at {}",
            experiment_name, experiment_id, tracking_uri
        );

        Ok(Self {
            client,
            source: Mutex::new(source),
            experiment_name: experiment_name.to_string(),
            experiment_id,
            active_run: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Id of the run the logging operations currently write to.
    pub fn active_run_id(&self) -> Option<String> {
        lock(&self.active_run).clone()
    }

    /// Start a run, optionally named.
    ///
    /// The returned handle ends the run when it goes out of scope. Only one
    /// run per tracker may be active at a time.
    pub fn start_run(&self, run_name: Option<&str>) -> Result<ActiveRun<'_, C, S>> {
        let mut active = lock(&self.active_run);
        if let Some(run_id) = active.as_ref() {
            return Err(TrackingError::RunAlreadyActive(run_id.clone()));
        }

        let info = self
            .client
            .create_run(&self.experiment_id, run_name, utils::now_millis())?;
        info!(
            "Started run {} ({})",
            info.run_id,
            info.run_name.as_deref().unwrap_or("unnamed")
        );
        *active = Some(info.run_id.clone());

        Ok(ActiveRun {
            tracker: self,
            info,
            ended: false,
        })
    }

    /// Log host CPU and memory utilization, plus per-GPU utilization and
    /// memory usage when GPUs are present.
    pub fn log_system_snapshot(&self) -> Result<()> {
        self.log_system_snapshot_at(0)
    }

    /// Log a system snapshot at step `step`, e.g. the sample index of a
    /// periodic monitor.
    ///
    /// Both sources are read before anything is written, so a failed GPU
    /// read logs nothing. A GPU without a utilization reading gets only its
    /// memory metric.
    pub fn log_system_snapshot_at(&self, step: i64) -> Result<()> {
        let run_id = self.require_run()?;

        let (host, gpus) = {
            let mut source = lock(&self.source);
            let host = source.host();
            (host, source.gpus()?)
        };
        debug!(
            "Host snapshot: cpu {:.1}%, memory {}",
            host.cpu_percent,
            format_memory(host.memory_used, host.memory_total)
        );

        self.write_metric(&run_id, utils::CPU_PERCENT, host.cpu_percent as f64, step)?;
        self.write_metric(&run_id, utils::MEMORY_PERCENT, host.memory_percent, step)?;

        let Some(gpu_metrics) = gpus else {
            return Ok(());
        };

        for (i, gpu) in gpu_metrics.gpus.iter().enumerate() {
            debug!(
                "GPU {} ({}): utilization {}, memory {}",
                i,
                gpu.name,
                gpu.utilization
                    .map_or_else(|| "n/a".to_string(), |u| format!("{u}%")),
                format_memory(gpu.memory_used, gpu.memory_total)
            );
            if let Some(utilization) = gpu.utilization {
                self.write_metric(&run_id, &gpu_utilization_key(i), utilization as f64, step)?;
            }
            self.write_metric(&run_id, &gpu_memory_key(i), gpu.memory_percent(), step)?;
        }

        Ok(())
    }

    /// Log each named value as a metric, in iteration order.
    pub fn log_metrics<I, K, V>(&self, metrics: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: MetricValue,
    {
        self.log_metrics_at(metrics, 0)
    }

    /// Log each named value as a metric at training step `step`.
    pub fn log_metrics_at<I, K, V>(&self, metrics: I, step: i64) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: MetricValue,
    {
        let run_id = self.require_run()?;
        for (key, value) in metrics {
            self.write_metric(&run_id, key.as_ref(), value.to_metric_value(), step)?;
        }
        Ok(())
    }

    /// Record the model name followed by each model parameter, in iteration order.
    pub fn log_model_info<I, K, V>(&self, model_name: &str, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        let run_id = self.require_run()?;
        self.write_param(&run_id, MODEL_NAME_PARAM, model_name.to_string())?;
        for (key, value) in params {
            self.write_param(&run_id, key.as_ref(), value.to_string())?;
        }
        Ok(())
    }

    fn require_run(&self) -> Result<String> {
        self.active_run_id().ok_or(TrackingError::NoActiveRun)
    }

    fn write_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<()> {
        debug!("metric {key}={value} (step {step})");
        let metric = Metric {
            key: key.to_string(),
            value,
            timestamp: utils::now_millis(),
            step,
        };
        self.client.log_metric(run_id, &metric)
    }

    fn write_param(&self, run_id: &str, key: &str, value: String) -> Result<()> {
        debug!("param {key}={value}");
        let param = Param {
            key: key.to_string(),
            value,
        };
        self.client.log_param(run_id, &param)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunInfo> {
        {
            let mut active = lock(&self.active_run);
            if active.as_deref() == Some(run_id) {
                *active = None;
            }
        }
        let info = self
            .client
            .update_run(run_id, status, utils::now_millis())?;
        info!("Ended run {} with status {}", run_id, status);
        Ok(info)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A run in progress.
///
/// Dropping the handle ends the run as `FINISHED`, or `FAILED` when the
/// thread is panicking. Use [`finish`](Self::finish), [`fail`](Self::fail)
/// or [`kill`](Self::kill) to end it explicitly and observe errors.
pub struct ActiveRun<'a, C: TrackingClient, S: MetricsSource> {
    tracker: &'a ExperimentTracker<C, S>,
    info: RunInfo,
    ended: bool,
}

impl<C: TrackingClient, S: MetricsSource> ActiveRun<'_, C, S> {
    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn finish(self) -> Result<RunInfo> {
        self.end(RunStatus::Finished)
    }

    pub fn fail(self) -> Result<RunInfo> {
        self.end(RunStatus::Failed)
    }

    pub fn kill(self) -> Result<RunInfo> {
        self.end(RunStatus::Killed)
    }

    fn end(mut self, status: RunStatus) -> Result<RunInfo> {
        self.ended = true;
        self.tracker.end_run(&self.info.run_id, status)
    }
}

impl<C: TrackingClient, S: MetricsSource> Drop for ActiveRun<'_, C, S> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        let status = if std::thread::panicking() {
            RunStatus::Failed
        } else {
            RunStatus::Finished
        };
        if let Err(e) = self.tracker.end_run(&self.info.run_id, status) {
            warn!("Failed to end run {}: {}", self.info.run_id, e);
        }
    }
}
