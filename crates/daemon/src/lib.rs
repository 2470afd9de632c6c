//! vidsqueeze
//!
//! Video compression service: accepts uploads, transcodes them with ffmpeg
//! under a bounded number of concurrent jobs, and serves the results until they
//! are cleaned up or expire.

pub mod admission;
pub mod artifacts;
pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod error;
pub mod job_executor;
pub mod jobs;
pub mod metrics;
pub mod presets;
pub mod server;
pub mod startup;
pub mod store;
pub mod sweeper;

pub use vidsqueeze_config as config;
pub use vidsqueeze_config::Config;
pub use admission::{Admission, AdmissionController};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{Daemon, DaemonError};
pub use encode::{
    build_ffmpeg_command, EncodeError, EngineEvent, FfmpegEngine, TranscodeEngine,
    TranscodeRequest, TranscodeRun,
};
pub use error::{ErrorKind, JobError};
pub use job_executor::{Download, JobExecutor, FAILURE_SUMMARY};
pub use jobs::{Job, JobStatus, JobView, NewJob};
pub use metrics::{collect_system_metrics, HealthReport, SystemMetrics};
pub use presets::{Preset, PresetKey};
pub use server::{create_router, run_server, AppState, ServerError};
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError};
pub use store::{JobStore, StatusCounts};
pub use sweeper::RetentionSweeper;
