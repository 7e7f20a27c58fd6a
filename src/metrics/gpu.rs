//! GPU metrics collection - supports NVML (Linux/Windows) and Metal (macOS).

use crate::types::{GpuBackend, GpuInfo, GpuMetrics};

// ============================================================================
// NVML Backend (Linux/Windows)
// ============================================================================

#[cfg(not(target_os = "macos"))]
mod nvml_backend {
    use super::*;
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::Nvml;

    /// GPU backend handle for NVML.
    pub struct GpuHandle {
        pub nvml: Option<Nvml>,
    }

    impl GpuHandle {
        pub fn new() -> Self {
            let nvml = match Nvml::init() {
                Ok(nvml) => Some(nvml),
                Err(e) if is_unavailable(&e) => {
                    tracing::debug!("NVML unavailable, GPU metrics disabled: {e}");
                    None
                }
                Err(e) => {
                    tracing::warn!("NVML failed to initialize, GPU metrics disabled: {e}");
                    None
                }
            };
            Self { nvml }
        }
    }

    /// NVML errors that mean "this machine has no usable NVIDIA GPU" rather
    /// than a failed reading.
    fn is_unavailable(e: &NvmlError) -> bool {
        matches!(
            e,
            NvmlError::Uninitialized
                | NvmlError::DriverNotLoaded
                | NvmlError::LibraryNotFound
                | NvmlError::LibloadingError(_)
        )
    }

    /// Collect GPU metrics from NVML.
    ///
    /// Device and memory query failures are returned; a device whose
    /// utilization counter is unsupported reports `utilization: None`.
    pub fn collect_gpu_metrics(handle: &GpuHandle) -> Result<Option<GpuMetrics>, NvmlError> {
        let Some(nvml) = handle.nvml.as_ref() else {
            return Ok(None);
        };

        let device_count = match nvml.device_count() {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if is_unavailable(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let driver_version = nvml.sys_driver_version().unwrap_or_else(|_| "N/A".into());
        let cuda_version = nvml
            .sys_cuda_driver_version()
            .map(|v| format!("{}.{}", v / 1000, (v % 1000) / 10))
            .unwrap_or_else(|_| "N/A".into());

        let mut gpus = Vec::with_capacity(device_count as usize);

        for i in 0..device_count {
            let device = nvml.device_by_index(i)?;

            let name = device.name().unwrap_or_else(|_| "Unknown GPU".into());
            let utilization = match device.utilization_rates() {
                Ok(u) => Some(u.gpu),
                Err(NvmlError::NotSupported) => None,
                Err(e) => return Err(e),
            };
            let memory = device.memory_info()?;

            gpus.push(GpuInfo {
                index: i,
                name,
                utilization,
                memory_used: memory.used,
                memory_total: memory.total,
            });
        }

        Ok(Some(GpuMetrics {
            gpus,
            driver_version,
            api_version: cuda_version,
            backend: GpuBackend::Nvml,
        }))
    }
}

// ============================================================================
// Metal Backend (macOS)
// ============================================================================

#[cfg(target_os = "macos")]
mod metal_backend {
    use super::*;
    use metal::Device;

    /// GPU backend handle for Metal.
    pub struct GpuHandle {
        pub devices: Vec<Device>,
    }

    impl GpuHandle {
        pub fn new() -> Self {
            Self {
                devices: Device::all(),
            }
        }
    }

    /// Collect GPU metrics from Metal.
    ///
    /// Metal exposes no utilization counter without elevated privileges, so
    /// utilization is left unset and memory is the allocated share of the
    /// recommended working set.
    pub fn collect_gpu_metrics(handle: &GpuHandle) -> Option<GpuMetrics> {
        if handle.devices.is_empty() {
            return None;
        }

        let gpus = handle
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| GpuInfo {
                index: i as u32,
                name: device.name().to_string(),
                utilization: None,
                memory_used: device.current_allocated_size(),
                memory_total: device.recommended_max_working_set_size(),
            })
            .collect();

        let api_version = match handle.devices.first() {
            Some(device) if device.supports_family(metal::MTLGPUFamily::Metal3) => "Metal 3",
            Some(device) if device.supports_family(metal::MTLGPUFamily::Apple7) => {
                "Metal 2 (Apple7)"
            }
            _ => "Metal",
        }
        .to_string();

        Some(GpuMetrics {
            gpus,
            driver_version: "N/A".to_string(),
            api_version,
            backend: GpuBackend::Metal,
        })
    }
}

// ============================================================================
// Public API
// ============================================================================

#[cfg(not(target_os = "macos"))]
pub use nvml_backend::GpuHandle;

#[cfg(target_os = "macos")]
pub use metal_backend::GpuHandle;

impl Default for GpuHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Error raised by the platform GPU backend while reading a device.
#[cfg(not(target_os = "macos"))]
pub type GpuError = nvml_wrapper::error::NvmlError;

/// Metal device queries cannot fail.
#[cfg(target_os = "macos")]
pub type GpuError = std::convert::Infallible;

/// Collect GPU metrics using the appropriate backend for the platform.
///
/// Returns `Ok(None)` when no GPU acceleration is available and an error when
/// a present device could not be read.
#[cfg(not(target_os = "macos"))]
pub fn collect_gpu_metrics(handle: &GpuHandle) -> Result<Option<GpuMetrics>, GpuError> {
    nvml_backend::collect_gpu_metrics(handle)
}

#[cfg(target_os = "macos")]
pub fn collect_gpu_metrics(handle: &GpuHandle) -> Result<Option<GpuMetrics>, GpuError> {
    Ok(metal_backend::collect_gpu_metrics(handle))
}
