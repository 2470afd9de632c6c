//! Startup checks module for vidsqueeze
//!
//! Preflight checks run before the server accepts requests:
//! - FFmpeg is reachable at the configured path and recent enough
//! - Upload and output directories exist

use crate::config::{Config, StorageConfig};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Oldest FFmpeg major release with the scale options the presets rely on
pub const MIN_FFMPEG_MAJOR: u32 = 5;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),

    #[error("Cannot prepare storage directory {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1-3ubuntu5 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
///
/// Git snapshot builds ("N-113000-g...") carry no release number and yield None.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Run `<ffmpeg> -version` and verify the release is new enough.
///
/// Returns the first line of the version banner. An unparseable version is
/// accepted with a warning.
pub fn check_ffmpeg(ffmpeg_path: &Path) -> Result<String, StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is FFmpeg installed and in PATH? Error: {}",
                ffmpeg_path.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let banner = version_output.lines().next().unwrap_or("(empty)").to_string();

    match parse_ffmpeg_version(&version_output) {
        Some(major) if major < MIN_FFMPEG_MAJOR => Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major
        ))),
        Some(_) => Ok(banner),
        None => {
            tracing::warn!(banner = %banner, "Could not parse FFmpeg version, continuing");
            Ok(banner)
        }
    }
}

/// Create the upload and output directories if they do not exist
pub fn ensure_storage_dirs(storage: &StorageConfig) -> Result<(), StartupError> {
    for dir in [&storage.uploads_dir, &storage.outputs_dir] {
        std::fs::create_dir_all(dir).map_err(|source| StartupError::Storage {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Storage directories
/// 2. FFmpeg availability and version
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    ensure_storage_dirs(&cfg.storage)?;
    let banner = check_ffmpeg(&cfg.engine.ffmpeg_path)?;
    tracing::info!(ffmpeg = %banner, "Startup checks passed");
    Ok(())
}
