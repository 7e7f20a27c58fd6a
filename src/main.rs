use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use runwatch::config::ENV_TRACKING_URI;
use runwatch::{ExperimentTracker, TrackerConfig};

/// Log host and GPU utilization to an MLflow run at a fixed interval.
#[derive(Parser, Debug)]
#[command(name = "runwatch", version, about)]
struct Args {
    /// Tracking server URI (defaults to MLFLOW_TRACKING_URI)
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Experiment name (defaults to MLFLOW_EXPERIMENT_NAME or "Default")
    #[arg(long)]
    experiment: Option<String>,

    /// Name of the run to create
    #[arg(long)]
    run_name: Option<String>,

    /// Seconds between snapshots
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,

    /// Number of snapshots to log
    #[arg(long, default_value_t = 6)]
    samples: u32,
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = TrackerConfig::from_lookup(|key| match (key, &args.tracking_uri) {
        (ENV_TRACKING_URI, Some(uri)) => Some(uri.clone()),
        _ => std::env::var(key).ok(),
    })
    .context("Invalid tracker configuration (pass --tracking-uri or set MLFLOW_TRACKING_URI)")?;

    if let Some(experiment) = &args.experiment {
        config.experiment_name = experiment.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let tracker = ExperimentTracker::from_config(&config).with_context(|| {
        format!(
            "Failed to configure experiment '{}' at {}",
            config.experiment_name, config.tracking_uri
        )
    })?;

    let run = tracker
        .start_run(args.run_name.as_deref())
        .context("Failed to start run")?;
    info!("Logging {} snapshots to run {}", args.samples, run.run_id());

    let interval = Duration::from_secs(args.interval_secs);
    let logged = (0..args.samples).try_for_each(|sample| {
        if sample > 0 {
            thread::sleep(interval);
        }
        tracker.log_system_snapshot_at(i64::from(sample))
    });

    match logged {
        Ok(()) => {
            run.finish().context("Failed to end run")?;
            Ok(())
        }
        Err(e) => {
            if let Err(end_err) = run.fail() {
                warn!("Failed to mark run as failed: {end_err}");
            }
            Err(e).context("Failed to log system snapshot")
        }
    }
}
