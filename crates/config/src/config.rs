//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value is outside its accepted range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Interface to bind (default 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Listening port (default 5000)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where uploaded and compressed artifacts live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            outputs_dir: default_outputs_dir(),
        }
    }
}

/// Upload acceptance rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Maximum accepted upload size in bytes (default 500 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Accepted container extensions, lowercase and without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "mpeg", "mpg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Job admission and retention settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Maximum number of jobs processing at once (default 3)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// Age after which an idle job is swept, in seconds (default 24h)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// How often the sweeper runs, in seconds (default 1h)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_concurrent_jobs() -> u32 {
    3
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// CPU-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Target CPU utilization (0.5-1.0, default 0.85)
    #[serde(default = "default_target_cpu_utilization")]
    pub target_cpu_utilization: f32,
}

fn default_target_cpu_utilization() -> f32 {
    0.85
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            logical_cores: None,
            target_cpu_utilization: default_target_cpu_utilization(),
        }
    }
}

/// External transcoder location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// ffmpeg binary, resolved through PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Unparseable values are ignored and the existing value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDSQUEEZE_HOST") {
            if !val.trim().is_empty() {
                self.server.host = val.trim().to_string();
            }
        }

        if let Some(port) = env_parse::<u16>("VIDSQUEEZE_PORT") {
            self.server.port = port;
        }

        if let Ok(val) = env::var("VIDSQUEEZE_UPLOADS_DIR") {
            self.storage.uploads_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("VIDSQUEEZE_OUTPUTS_DIR") {
            self.storage.outputs_dir = PathBuf::from(val);
        }

        if let Some(bytes) = env_parse::<u64>("VIDSQUEEZE_MAX_UPLOAD_BYTES") {
            self.uploads.max_upload_bytes = bytes;
        }

        if let Some(jobs) = env_parse::<u32>("VIDSQUEEZE_MAX_CONCURRENT_JOBS") {
            self.jobs.max_concurrent_jobs = jobs;
        }

        if let Some(secs) = env_parse::<u64>("VIDSQUEEZE_RETENTION_SECS") {
            self.jobs.retention_secs = secs;
        }

        if let Some(secs) = env_parse::<u64>("VIDSQUEEZE_SWEEP_INTERVAL_SECS") {
            self.jobs.sweep_interval_secs = secs;
        }

        if let Ok(val) = env::var("VIDSQUEEZE_FFMPEG_PATH") {
            self.engine.ffmpeg_path = PathBuf::from(val);
        }

        if let Some(cores) = env_parse::<u32>("CPU_LOGICAL_CORES") {
            self.cpu.logical_cores = Some(cores);
        }
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.jobs.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.jobs.retention_secs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.retention_secs must be at least 1".to_string(),
            ));
        }
        if self.uploads.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "uploads.allowed_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse().ok())
}
