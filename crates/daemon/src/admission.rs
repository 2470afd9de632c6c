//! Admission control for the transcoder.
//!
//! The number of active jobs is always derived by scanning the job table for
//! `Processing` records, never kept as a separate counter, so a missed
//! decrement path cannot shrink capacity.

use crate::jobs::{Job, JobStatus};
use std::collections::HashMap;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { active: usize, limit: usize },
}

/// Enforces the global ceiling on simultaneously processing jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionController {
    limit: usize,
}

impl AdmissionController {
    /// A zero limit is raised to 1; a ceiling of 0 would reject everything.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Count of jobs currently Processing
    pub fn active_count(jobs: &HashMap<String, Job>) -> usize {
        jobs.values()
            .filter(|job| job.status == JobStatus::Processing)
            .count()
    }

    /// Decide whether one more job may start now.
    ///
    /// Must be called under the same store lock as the transition it guards.
    pub fn try_admit(&self, jobs: &HashMap<String, Job>) -> Admission {
        let active = Self::active_count(jobs);
        if active < self.limit {
            Admission::Admitted
        } else {
            Admission::Rejected {
                active,
                limit: self.limit,
            }
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(3)
    }
}
