//! Health metrics for vidsqueeze
//!
//! Point-in-time report served by the health endpoint: job counts, admission
//! headroom, files on disk, and host resource usage.

use crate::admission::AdmissionController;
use crate::artifacts::count_files;
use crate::config::StorageConfig;
use crate::jobs::current_timestamp_ms;
use crate::store::{JobStore, StatusCounts};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::System;

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
    /// Resident memory of this process, when it could be read
    pub process_memory_bytes: Option<u64>,
}

/// Files currently present in the storage directories
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCounts {
    pub uploads: usize,
    pub outputs: usize,
}

/// Health endpoint payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub timestamp_unix_ms: i64,
    pub uptime_secs: u64,
    pub jobs: StatusCounts,
    pub active_jobs: usize,
    pub max_concurrent_jobs: usize,
    pub files: FileCounts,
    pub system: SystemMetrics,
}

impl HealthReport {
    /// Assemble a report. Blocking: samples the host via sysinfo and reads
    /// both storage directories.
    pub fn collect(
        store: &JobStore,
        admission: &AdmissionController,
        storage: &StorageConfig,
        uptime: Duration,
    ) -> Self {
        Self::with_system(store, admission, storage, uptime, collect_system_metrics())
    }

    /// Assemble a report around an already-sampled system snapshot
    pub fn with_system(
        store: &JobStore,
        admission: &AdmissionController,
        storage: &StorageConfig,
        uptime: Duration,
        system: SystemMetrics,
    ) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp_unix_ms: current_timestamp_ms(),
            uptime_secs: uptime.as_secs(),
            jobs: store.counts(),
            active_jobs: store.active_count(),
            max_concurrent_jobs: admission.limit(),
            files: FileCounts {
                uploads: count_files(&storage.uploads_dir),
                outputs: count_files(&storage.outputs_dir),
            },
            system,
        }
    }
}

/// Collects current system metrics using sysinfo
///
/// Blocks for [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] so CPU usage is measured
/// over two samples; call from a blocking context.
pub fn collect_system_metrics() -> SystemMetrics {
    let mut sys = System::new_all();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    let process_memory_bytes = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| sys.process(pid))
        .map(|process| process.memory());

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
        process_memory_bytes,
    }
}
