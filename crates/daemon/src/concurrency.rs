//! Concurrency planning module for vidsqueeze
//!
//! Splits the CPU budget between the jobs that may run at once, so each ffmpeg
//! process gets a fixed `-threads` value instead of grabbing every core.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Target number of threads to use based on utilization
    pub target_threads: u32,
    /// Encoder threads handed to each ffmpeg process
    pub threads_per_job: u32,
    /// Admission ceiling
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Clamps target_cpu_utilization to [0.5, 1.0]
    /// - Divides the target threads evenly across the admission ceiling,
    ///   never going below one thread per job
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .cpu
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32)
            .max(1);

        let clamped_utilization = clamp_utilization(cfg.cpu.target_cpu_utilization);
        let target_threads = (((total_cores as f32) * clamped_utilization).round() as u32).max(1);

        let max_concurrent_jobs = cfg.jobs.max_concurrent_jobs.max(1);
        let threads_per_job = (target_threads / max_concurrent_jobs).max(1);

        Self {
            total_cores,
            target_threads,
            threads_per_job,
            max_concurrent_jobs,
        }
    }
}

/// Clamp utilization to valid range [0.5, 1.0]
fn clamp_utilization(util: f32) -> f32 {
    if util.is_nan() {
        return 1.0;
    }
    util.clamp(0.5, 1.0)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
