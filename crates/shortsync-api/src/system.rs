//! Host resource readings for the `/info` endpoint.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

/// Usage above this percentage marks a resource unhealthy.
const MEMORY_LIMIT_PERCENT: f64 = 90.0;
const DISK_LIMIT_PERCENT: f64 = 90.0;
const CPU_LIMIT_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent_used: f64,
    pub healthy: bool,
}

impl ResourceUsage {
    fn new(total_bytes: u64, used_bytes: u64, limit_percent: f64) -> Self {
        let percent_used = if total_bytes > 0 {
            used_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_bytes,
            used_bytes,
            percent_used,
            healthy: total_bytes > 0 && percent_used < limit_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuUsage {
    pub percent: f64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub uptime_secs: u64,
    pub cpu: CpuUsage,
    pub memory: ResourceUsage,
    /// Disk holding the working directory, when its mount can be found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<ResourceUsage>,
}

impl HostReport {
    pub fn healthy(&self) -> bool {
        self.cpu.healthy && self.memory.healthy && self.disk.as_ref().is_none_or(|d| d.healthy)
    }
}

/// Keeps one `System` so CPU usage is measured between successive calls.
pub struct HostMonitor {
    started: Instant,
    system: Mutex<System>,
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
        }
    }

    pub async fn report(&self, data_dir: &Path) -> HostReport {
        let (cpu, memory) = {
            let mut system = self.system.lock().await;
            system.refresh_cpu_all();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_usage());
            let memory = ResourceUsage::new(
                system.total_memory(),
                system.used_memory(),
                MEMORY_LIMIT_PERCENT,
            );
            (cpu, memory)
        };

        HostReport {
            uptime_secs: self.started.elapsed().as_secs(),
            cpu: CpuUsage {
                percent: cpu,
                healthy: cpu < CPU_LIMIT_PERCENT,
            },
            memory,
            disk: disk_usage(data_dir),
        }
    }
}

/// Usage of the disk with the longest mount point containing `path`.
fn disk_usage(path: &Path) -> Option<ResourceUsage> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| {
            let total = disk.total_space();
            ResourceUsage::new(
                total,
                total.saturating_sub(disk.available_space()),
                DISK_LIMIT_PERCENT,
            )
        })
}
