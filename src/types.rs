//! Data types and structures used throughout runwatch.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Host CPU and memory snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
}

/// A single GPU as seen by the platform backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    /// Compute utilization in percent; `None` when the backend cannot report it.
    pub utilization: Option<u32>,
    pub memory_used: u64,
    pub memory_total: u64,
}

impl GpuInfo {
    /// Share of device memory in use, in percent.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total > 0 {
            (self.memory_used as f64 / self.memory_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Which GPU API produced a [`GpuMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuBackend {
    #[default]
    Nvml,
    Metal,
}

/// Aggregated GPU metrics.
#[derive(Clone, Debug, Default)]
pub struct GpuMetrics {
    pub gpus: Vec<GpuInfo>,
    pub driver_version: String,
    pub api_version: String,
    pub backend: GpuBackend,
}

/// Lifecycle status of a run, as reported by the tracking backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        };
        f.write_str(s)
    }
}

/// Metadata of a run created by the tracking backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    pub experiment_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

/// A metric value recorded against a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub key: String,
    #[serde(serialize_with = "serialize_metric_value")]
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub step: i64,
}

/// A parameter recorded against a run. Values are stored as text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// JSON has no NaN or infinities; send them as the protobuf-JSON strings the
/// tracking server parses back into doubles.
fn serialize_metric_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Numeric types accepted as metric values.
///
/// Covers every primitive integer width, so counts such as token totals
/// (`u64`) or batch sizes (`usize`) can be logged without a cast. Integers
/// above 2^53 lose precision, as they would in any f64 metric store.
pub trait MetricValue {
    fn to_metric_value(self) -> f64;
}

macro_rules! impl_metric_value {
    ($($t:ty),*) => {
        $(
            impl MetricValue for $t {
                fn to_metric_value(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_metric_value!(f64, f32, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
