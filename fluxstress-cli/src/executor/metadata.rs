//! System Metadata Collection
//!
//! Collects system information for report metadata.
//!
//! ## Collected Data
//!
//! - **OS**: operating system name, kernel release and architecture
//! - **CPU**: model name and online core count
//! - **Memory**: total system RAM in GB and page size
//! - **Timestamp**: UTC time of report generation
//!
//! Linux-specific data (CPU model, kernel release) gracefully degrades on
//! other platforms, returning "Unknown".

use chrono::Utc;
use fluxstress_core::{online_cpus, page_size, physical_memory};
use fluxstress_report::{ReportMeta, RunConfigInfo, SystemInfo};

/// Report schema written by this version
pub const SCHEMA_VERSION: u32 = 1;

/// Build report metadata including system info and run configuration
pub fn build_report_meta(config: RunConfigInfo) -> ReportMeta {
    let system = SystemInfo {
        os: std::env::consts::OS.to_string(),
        os_version: get_os_release().unwrap_or_else(|| "Unknown".to_string()),
        arch: std::env::consts::ARCH.to_string(),
        cpu: get_cpu_model().unwrap_or_else(|| "Unknown".to_string()),
        cpu_cores: online_cpus() as u32,
        memory_gb: physical_memory()
            .map(|b| b as f64 / 1024.0 / 1024.0 / 1024.0)
            .unwrap_or(0.0),
        page_size: page_size(),
    };

    ReportMeta {
        schema_version: SCHEMA_VERSION,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        system,
        config,
    }
}

/// Kernel release (Linux only)
fn get_os_release() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .ok()
            .map(|s| s.trim().to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Get CPU model name from /proc/cpuinfo (Linux only)
fn get_cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name") || l.starts_with("Model"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
