//! Host metrics collection (CPU, memory).

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::types::HostMetrics;

/// Create a `System` tracking only what host snapshots need.
pub fn new_system() -> System {
    let mut system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::new().with_cpu_usage())
            .with_memory(MemoryRefreshKind::new().with_ram()),
    );
    // CPU usage is a delta between refreshes; prime the first one.
    system.refresh_cpu_usage();
    system
}

/// Refresh and collect host metrics.
///
/// CPU usage covers the time since the previous call.
pub fn collect_host_metrics(system: &mut System) -> HostMetrics {
    system.refresh_cpu_usage();
    system.refresh_memory_specifics(MemoryRefreshKind::new().with_ram());

    let memory_total = system.total_memory();
    let memory_used = memory_total.saturating_sub(system.available_memory());

    HostMetrics {
        cpu_percent: system.global_cpu_usage(),
        memory_percent: memory_percent(memory_used, memory_total),
        memory_used,
        memory_total,
    }
}

/// Percentage of memory not available for new allocations.
pub fn memory_percent(used: u64, total: u64) -> f64 {
    if total > 0 {
        (used as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
