//! Host resource probe.

use sysinfo::{CpuRefreshKind, RefreshKind, System};

use pmscale_core::HostStats;

/// Source of host-level memory and CPU information.
pub trait HostProbe: Send {
    fn host_stats(&mut self) -> HostStats;
}

/// Reads host stats through `sysinfo`.
pub struct SysinfoHost {
    sys: System,
    cpu_cores: u32,
}

impl SysinfoHost {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
        let cpu_cores = sys.cpus().len().max(1) as u32;
        Self { sys, cpu_cores }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoHost {
    fn host_stats(&mut self) -> HostStats {
        self.sys.refresh_memory();
        HostStats {
            // Available rather than free: includes reclaimable page cache.
            free_memory_bytes: self.sys.available_memory(),
            total_memory_bytes: self.sys.total_memory(),
            cpu_cores: self.cpu_cores,
        }
    }
}

/// Fixed host stats, for tests and dry runs.
impl HostProbe for HostStats {
    fn host_stats(&mut self) -> HostStats {
        *self
    }
}
