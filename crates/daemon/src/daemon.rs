//! Daemon startup and main loop for vidsqueeze
//!
//! Wires the job store, engine, executor, sweeper and HTTP server together and
//! runs them until shutdown.

use crate::admission::AdmissionController;
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::encode::{FfmpegEngine, TranscodeEngine};
use crate::job_executor::JobExecutor;
use crate::server::{run_server, AppState, ServerError};
use crate::startup::{ensure_storage_dirs, run_startup_checks, StartupError};
use crate::store::JobStore;
use crate::sweeper::RetentionSweeper;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    /// Job lifecycle orchestrator
    pub executor: Arc<JobExecutor>,
    sweeper: RetentionSweeper,
}

impl Daemon {
    /// Initialize the daemon with a loaded configuration
    ///
    /// 1. Run startup checks (storage directories, ffmpeg)
    /// 2. Derive concurrency plan and build the components
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when ffmpeg is not available.
    pub fn new_without_checks(config: Config) -> Self {
        let plan = derive_plan(&config);
        let engine = Arc::new(FfmpegEngine::new(config.engine.ffmpeg_path.clone(), &plan));
        Self::with_engine(config, engine)
    }

    /// Build the daemon around a specific transcoding engine
    pub fn with_engine(config: Config, engine: Arc<dyn TranscodeEngine>) -> Self {
        let concurrency_plan = derive_plan(&config);
        let store = JobStore::new();
        let admission = AdmissionController::new(concurrency_plan.max_concurrent_jobs as usize);
        let executor = Arc::new(JobExecutor::new(
            store.clone(),
            engine,
            admission,
            config.storage.outputs_dir.clone(),
        ));
        let sweeper = RetentionSweeper::new(
            store,
            config.jobs.retention(),
            config.jobs.sweep_interval(),
        );

        Self {
            config,
            concurrency_plan,
            executor,
            sweeper,
        }
    }

    pub fn store(&self) -> &JobStore {
        self.executor.store()
    }

    /// Handler state for the HTTP server
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.executor.clone(),
            self.config.uploads.clone(),
            self.config.storage.clone(),
        )
    }

    /// Socket address from the `[server]` section
    pub fn listen_addr(&self) -> Result<SocketAddr, DaemonError> {
        let host = &self.config.server.host;
        let ip: IpAddr = host
            .parse()
            .map_err(|_| DaemonError::InvalidAddress(host.clone()))?;
        Ok(SocketAddr::new(ip, self.config.server.port))
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Run the daemon with all background tasks
    ///
    /// Starts the retention sweeper and serves the API until `shutdown`
    /// resolves, then stops the sweeper.
    pub async fn run_with_server<F>(&mut self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        ensure_storage_dirs(&self.config.storage)?;
        let addr = self.listen_addr()?;

        tracing::info!(
            %addr,
            max_concurrent_jobs = self.concurrency_plan.max_concurrent_jobs,
            threads_per_job = self.concurrency_plan.threads_per_job,
            uploads = %self.config.storage.uploads_dir.display(),
            outputs = %self.config.storage.outputs_dir.display(),
            "Daemon starting"
        );

        self.sweeper.start();
        let served = run_server(self.app_state(), addr, shutdown).await;
        self.sweeper.stop().await;

        tracing::info!(jobs = self.store().len(), "Daemon stopped");
        served.map_err(DaemonError::from)
    }
}
