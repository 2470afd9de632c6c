//! CLI entry point for vidsqueeze
//!
//! Parses command line arguments, sets up logging and runs the daemon until
//! Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vidsqueeze::{Config, Daemon};

/// vidsqueeze - upload, compress and download videos over HTTP
#[derive(Parser, Debug)]
#[command(name = "vidsqueeze")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file; defaults apply if it does not exist
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the ffmpeg startup check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Verbose logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "vidsqueeze=debug,vidsqueeze_cli=debug".to_string()
        } else {
            "vidsqueeze=info,vidsqueeze_cli=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    tracing::info!(config = %args.config.display(), "vidsqueeze starting");

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let daemon_result = if args.skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Ok(Daemon::new_without_checks(config))
    } else {
        Daemon::with_config(config).await
    };

    let mut daemon = match daemon_result {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        cores = daemon.concurrency_plan.total_cores,
        max_concurrent_jobs = daemon.concurrency_plan.max_concurrent_jobs,
        threads_per_job = daemon.concurrency_plan.threads_per_job,
        "Daemon initialized"
    );

    if let Err(e) = daemon.run_with_server(shutdown_signal()).await {
        tracing::error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
