//! Host and GPU metrics sources.

mod gpu;
mod system;

pub use gpu::{collect_gpu_metrics, GpuError, GpuHandle};
pub use system::{collect_host_metrics, memory_percent};

use sysinfo::System;

use crate::error::Result;
use crate::types::{GpuMetrics, HostMetrics};

/// Supplies the readings behind a system snapshot.
pub trait MetricsSource {
    /// Current host CPU and memory utilization.
    fn host(&mut self) -> HostMetrics;

    /// Attached GPUs, or `None` when the host has no GPU acceleration.
    ///
    /// A GPU that is present but cannot be read is an error, never `None`.
    fn gpus(&mut self) -> Result<Option<GpuMetrics>>;
}

/// Reads the local machine through sysinfo and the platform GPU API.
pub struct SystemSource {
    system: System,
    gpu: GpuHandle,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            system: system::new_system(),
            gpu: GpuHandle::new(),
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemSource {
    fn host(&mut self) -> HostMetrics {
        collect_host_metrics(&mut self.system)
    }

    fn gpus(&mut self) -> Result<Option<GpuMetrics>> {
        Ok(collect_gpu_metrics(&self.gpu)?)
    }
}
