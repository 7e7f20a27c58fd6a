//! Utility functions for metric naming, timestamps and formatting.

use chrono::Utc;
use humansize::{format_size, BINARY};

pub const CPU_PERCENT: &str = "cpu_percent";
pub const MEMORY_PERCENT: &str = "memory_percent";

/// Metric name for the compute utilization of GPU `index`.
pub fn gpu_utilization_key(index: usize) -> String {
    format!("gpu_{}_utilization", index)
}

/// Metric name for the memory usage of GPU `index`.
pub fn gpu_memory_key(index: usize) -> String {
    format!("gpu_{}_memory_percent", index)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Memory usage as "used / total" in binary units.
pub fn format_memory(used: u64, total: u64) -> String {
    format!("{} / {}", format_size(used, BINARY), format_size(total, BINARY))
}
