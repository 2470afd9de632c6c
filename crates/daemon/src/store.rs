//! In-memory job store.
//!
//! Single source of truth for job state. All mutation goes through the methods
//! here, each of which holds the write lock for the whole check-and-transition,
//! so concurrent admissions cannot both take the last slot. The lock is never
//! held across an `.await` or a filesystem call.

use crate::admission::{Admission, AdmissionController};
use crate::artifacts::discard_artifact;
use crate::error::JobError;
use crate::jobs::{Job, JobStatus, JobView};
use crate::presets::PresetKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the orchestrator needs to run an admitted job
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingTicket {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub preset: PresetKey,
    pub original_size_bytes: u64,
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub uploaded: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Shared handle to the job table
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job. Ids are UUIDs, so an existing entry is never replaced.
    pub fn insert(&self, job: Job) -> JobView {
        let view = job.view();
        self.jobs.write().insert(job.id.clone(), job);
        view
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn view(&self, id: &str) -> Result<JobView, JobError> {
        self.jobs
            .read()
            .get(id)
            .map(Job::view)
            .ok_or(JobError::NotFound)
    }

    /// All jobs, most recent activity first
    pub fn list(&self) -> Vec<JobView> {
        let jobs = self.jobs.read();
        let mut ordered: Vec<&Job> = jobs.values().collect();
        ordered.sort_by(|a, b| {
            b.last_activity_ms()
                .cmp(&a.last_activity_ms())
                .then_with(|| a.id.cmp(&b.id))
        });
        ordered.into_iter().map(Job::view).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read();
        let mut counts = StatusCounts {
            total: jobs.len(),
            ..StatusCounts::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Uploaded => counts.uploaded += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn active_count(&self) -> usize {
        AdmissionController::active_count(&self.jobs.read())
    }

    /// Admit a job and move it to Processing, atomically with respect to
    /// every other store mutation.
    ///
    /// A job whose input artifact is gone is evicted and reported as
    /// [`JobError::InputMissing`]. That includes Failed jobs, whose input is
    /// deleted when they fail. The input is checked on disk before the write
    /// lock is taken.
    pub fn begin_processing(
        &self,
        id: &str,
        admission: &AdmissionController,
        now_ms: i64,
    ) -> Result<ProcessingTicket, JobError> {
        let (status, input_path) = {
            let jobs = self.jobs.read();
            let job = jobs.get(id).ok_or(JobError::NotFound)?;
            ensure_startable(job)?;
            (job.status, job.input_path.clone())
        };
        let input_present = status != JobStatus::Failed && input_path.exists();

        let mut jobs = self.jobs.write();
        let job = jobs.get(id).ok_or(JobError::NotFound)?;
        ensure_startable(job)?;

        if job.status == JobStatus::Failed || !input_present {
            tracing::warn!(
                job_id = id,
                path = %job.input_path.display(),
                "Input artifact missing, evicting job"
            );
            jobs.remove(id);
            return Err(JobError::InputMissing);
        }

        if let Admission::Rejected { active, limit } = admission.try_admit(&jobs) {
            return Err(JobError::Busy { active, limit });
        }

        let job = jobs.get_mut(id).ok_or(JobError::NotFound)?;
        job.start(now_ms).map_err(|_| JobError::AlreadyProcessing)?;

        Ok(ProcessingTicket {
            job_id: job.id.clone(),
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            preset: job.preset,
            original_size_bytes: job.original_size_bytes,
        })
    }

    /// Write a progress sample; returns false if the job is gone.
    pub fn record_progress(&self, id: &str, percent: u8) -> bool {
        match self.jobs.write().get_mut(id) {
            Some(job) => {
                job.record_progress(percent);
                true
            }
            None => false,
        }
    }

    /// `Processing -> Completed`. Returns the updated record, or None if the
    /// job is gone or not Processing.
    pub fn complete(&self, id: &str, compressed_size_bytes: u64, now_ms: i64) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        job.complete(compressed_size_bytes, now_ms).ok()?;
        Some(job.clone())
    }

    /// `Processing -> Failed`. Returns the updated record, or None if the job
    /// is gone or not Processing.
    pub fn fail(&self, id: &str, summary: &str, now_ms: i64) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        job.fail(summary, now_ms).ok()?;
        Some(job.clone())
    }

    /// Explicit cleanup: drop the record, then delete its files once the lock
    /// is released.
    ///
    /// A Processing job is refused; it will reach a terminal state on its own.
    pub fn remove(&self, id: &str) -> Result<Job, JobError> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs.get(id).ok_or(JobError::NotFound)?;
            if job.status == JobStatus::Processing {
                return Err(JobError::AlreadyProcessing);
            }
            jobs.remove(id).ok_or(JobError::NotFound)?
        };
        discard_job_files(&job);
        Ok(job)
    }

    /// Evict every non-Processing job idle for longer than `retention_ms` and
    /// delete its files outside the lock. Returns the evicted records.
    pub fn sweep_expired(&self, now_ms: i64, retention_ms: i64) -> Vec<Job> {
        let evicted: Vec<Job> = {
            let mut jobs = self.jobs.write();
            let expired: Vec<String> = jobs
                .values()
                .filter(|job| job.status != JobStatus::Processing)
                .filter(|job| now_ms.saturating_sub(job.last_activity_ms()) > retention_ms)
                .map(|job| job.id.clone())
                .collect();
            expired.iter().filter_map(|id| jobs.remove(id)).collect()
        };
        evicted.iter().for_each(discard_job_files);
        evicted
    }
}

fn ensure_startable(job: &Job) -> Result<(), JobError> {
    match job.status {
        JobStatus::Processing => Err(JobError::AlreadyProcessing),
        JobStatus::Completed => Err(JobError::AlreadyCompleted),
        JobStatus::Uploaded | JobStatus::Failed => Ok(()),
    }
}

fn discard_job_files(job: &Job) {
    discard_artifact(&job.id, &job.input_path);
    discard_artifact(&job.id, &job.output_path);
}
