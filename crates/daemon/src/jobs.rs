//! Job records and their lifecycle state machine.
//!
//! A job moves `Uploaded -> Processing -> {Completed | Failed}` and never
//! leaves a terminal state. Records live only in memory (see [`crate::store`]).

use crate::presets::PresetKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Upload stored, waiting for a compression request.
    Uploaded,
    /// The transcoder is running for this job.
    Processing,
    /// Output artifact is ready for download.
    Completed,
    /// Transcoding failed; no output is kept.
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Uploaded
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Uploaded => write!(f, "uploaded"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Uploaded, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Rejected lifecycle edge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One compression request tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    pub status: JobStatus,
    /// Percentage 0..=100.
    pub progress: u8,
    pub preset: PresetKey,
    /// Name the client uploaded the file under.
    pub input_file_name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: Option<u64>,
    /// Percentage saved, rounded to 2 decimals.
    pub compression_ratio: Option<f64>,
    /// Unix timestamps in milliseconds.
    pub uploaded_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Redacted failure summary, set only when Failed.
    pub error: Option<String>,
}

/// Input for registering an already-persisted upload
#[derive(Debug, Clone)]
pub struct NewJob {
    pub input_file_name: String,
    pub input_path: PathBuf,
    pub size_bytes: u64,
    pub preset: PresetKey,
}

impl Job {
    /// Create an `Uploaded` job with a fresh id.
    ///
    /// `output_path` is derived by the caller from the job id.
    pub fn new(new_job: NewJob, output_path: impl FnOnce(&str) -> PathBuf, now_ms: i64) -> Self {
        let id = Uuid::new_v4().to_string();
        let output_path = output_path(&id);
        Self {
            id,
            status: JobStatus::Uploaded,
            progress: 0,
            preset: new_job.preset,
            input_file_name: new_job.input_file_name,
            input_path: new_job.input_path,
            output_path,
            original_size_bytes: new_job.size_bytes,
            compressed_size_bytes: None,
            compression_ratio: None,
            uploaded_at: now_ms,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// `Uploaded -> Processing`
    pub fn start(&mut self, now_ms: i64) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing)?;
        self.progress = 0;
        self.started_at = Some(now_ms);
        Ok(())
    }

    /// Record a progress sample. Ignored outside Processing; regressions are
    /// clamped so progress never decreases.
    pub fn record_progress(&mut self, percent: u8) {
        if self.status == JobStatus::Processing {
            self.progress = self.progress.max(percent.min(100));
        }
    }

    /// `Processing -> Completed`
    pub fn complete(
        &mut self,
        compressed_size_bytes: u64,
        now_ms: i64,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.completed_at = Some(now_ms);
        self.compressed_size_bytes = Some(compressed_size_bytes);
        self.compression_ratio = Some(compression_ratio(
            self.original_size_bytes,
            compressed_size_bytes,
        ));
        Ok(())
    }

    /// `Processing -> Failed`
    pub fn fail(&mut self, summary: &str, now_ms: i64) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(now_ms);
        self.error = Some(summary.to_string());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Latest known timestamp; drives list ordering and retention.
    pub fn last_activity_ms(&self) -> i64 {
        [Some(self.uploaded_at), self.started_at, self.completed_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.uploaded_at)
    }

    /// Seconds spent processing, once finished.
    pub fn processing_time_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => {
                Some(round_to((end - start) as f64 / 1000.0, 1))
            }
            _ => None,
        }
    }

    /// Public view without filesystem paths
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            resolution: self.preset,
            input_file: self.input_file_name.clone(),
            original_size: self.original_size_bytes,
            compressed_size: self.compressed_size_bytes,
            compression_ratio: self.compression_ratio.map(|r| format!("{:.2}", r)),
            processing_time: self.processing_time_secs().map(|s| format!("{:.1}", s)),
            upload_time: self.uploaded_at,
            start_time: self.started_at,
            end_time: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Job record as reported to callers; internal paths are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub resolution: PresetKey,
    pub input_file: String,
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<String>,
    pub upload_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `(1 - compressed / original) * 100`, rounded to 2 decimals.
///
/// An empty original yields 0.
pub fn compression_ratio(original_bytes: u64, compressed_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    round_to((1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0, 2)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
