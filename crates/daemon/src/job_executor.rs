//! Job executor module for vidsqueeze
//!
//! Drives each admitted job from Processing to exactly one terminal state.
//! Admission happens in the store under its write lock; the executor owns what
//! follows: running the engine, recording progress, and cleaning up artifacts
//! on every exit path.

use crate::admission::AdmissionController;
use crate::artifacts::{discard_artifact, download_file_name, output_path_for};
use crate::encode::{EncodeError, EngineEvent, TranscodeEngine, TranscodeRequest};
use crate::error::JobError;
use crate::jobs::{current_timestamp_ms, Job, JobStatus, JobView, NewJob};
use crate::presets::{Preset, PresetKey};
use crate::store::{JobStore, ProcessingTicket};
use std::path::PathBuf;
use std::sync::Arc;

/// Summary stored on a failed job. Engine diagnostics go to the log only.
pub const FAILURE_SUMMARY: &str =
    "Compression failed. The video file may be corrupted or in an unsupported format.";

/// A completed job's artifact, ready to be streamed
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub path: PathBuf,
    /// Suggested name for the client
    pub file_name: String,
}

/// Marks a job Failed and removes its artifacts unless disarmed.
///
/// Held by the orchestration task for the whole Processing phase, so a panic
/// or a dropped task still frees the admission slot.
struct ProcessingGuard {
    store: JobStore,
    job_id: String,
    input_path: PathBuf,
    output_path: PathBuf,
    armed: bool,
}

impl ProcessingGuard {
    fn new(store: JobStore, ticket: &ProcessingTicket) -> Self {
        Self {
            store,
            job_id: ticket.job_id.clone(),
            input_path: ticket.input_path.clone(),
            output_path: ticket.output_path.clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            job_id = %self.job_id,
            "Orchestration ended without a terminal state, failing job"
        );
        discard_artifact(&self.job_id, &self.input_path);
        discard_artifact(&self.job_id, &self.output_path);
        self.store
            .fail(&self.job_id, FAILURE_SUMMARY, current_timestamp_ms());
    }
}

/// Job lifecycle orchestrator
pub struct JobExecutor {
    store: JobStore,
    engine: Arc<dyn TranscodeEngine>,
    admission: AdmissionController,
    outputs_dir: PathBuf,
}

impl JobExecutor {
    /// Create a new JobExecutor
    ///
    /// # Arguments
    /// * `store` - Shared job table
    /// * `engine` - Transcoder used for every job
    /// * `admission` - Concurrency ceiling applied on start
    /// * `outputs_dir` - Directory compressed files are written to
    pub fn new(
        store: JobStore,
        engine: Arc<dyn TranscodeEngine>,
        admission: AdmissionController,
        outputs_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            engine,
            admission,
            outputs_dir,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn admission(&self) -> AdmissionController {
        self.admission
    }

    /// Register an upload that is already on disk as an `Uploaded` job
    pub fn create_job(&self, new_job: NewJob) -> JobView {
        let input_path = new_job.input_path.clone();
        let outputs_dir = &self.outputs_dir;
        let job = Job::new(
            new_job,
            |id| output_path_for(outputs_dir, id, &input_path),
            current_timestamp_ms(),
        );
        tracing::info!(
            job_id = %job.id,
            preset = %job.preset,
            size_bytes = job.original_size_bytes,
            file = %job.input_file_name,
            "Job created"
        );
        self.store.insert(job)
    }

    /// Register an upload with a client-supplied preset key.
    ///
    /// A missing key selects the default preset. An unknown key rejects the
    /// upload and deletes the stored file.
    pub fn register_upload(
        &self,
        input_file_name: String,
        input_path: PathBuf,
        size_bytes: u64,
        preset: Option<&str>,
    ) -> Result<JobView, JobError> {
        let preset = match preset.map(str::trim).filter(|p| !p.is_empty()) {
            None => PresetKey::default(),
            Some(raw) => match raw.parse::<PresetKey>() {
                Ok(key) => key,
                Err(e) => {
                    discard_artifact("upload", &input_path);
                    return Err(e);
                }
            },
        };
        Ok(self.create_job(NewJob {
            input_file_name,
            input_path,
            size_bytes,
            preset,
        }))
    }

    /// Admit a job and start transcoding it in the background.
    ///
    /// Returns once the job is Processing; the outcome is observed through
    /// the store. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, id: &str) -> Result<JobView, JobError> {
        let ticket = self
            .store
            .begin_processing(id, &self.admission, current_timestamp_ms())?;
        let view = self.store.view(id)?;

        tracing::info!(
            job_id = %ticket.job_id,
            preset = %ticket.preset,
            active = self.store.active_count(),
            limit = self.admission.limit(),
            "Compression started"
        );

        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run(ticket).await });

        Ok(view)
    }

    /// Consume the engine's events until it finishes, then settle the job.
    async fn run(&self, ticket: ProcessingTicket) {
        let mut guard = ProcessingGuard::new(self.store.clone(), &ticket);

        let request = TranscodeRequest {
            job_id: ticket.job_id.clone(),
            input_path: ticket.input_path.clone(),
            output_path: ticket.output_path.clone(),
            preset: Preset::for_key(ticket.preset),
        };

        let mut events = self.engine.transcode(request);
        let mut outcome = Err(EncodeError::Aborted);
        while let Some(event) = events.next().await {
            match event {
                EngineEvent::Progress(pct) => {
                    tracing::debug!(job_id = %ticket.job_id, progress = pct, "Progress");
                    self.store.record_progress(&ticket.job_id, pct);
                }
                EngineEvent::Finished(result) => {
                    outcome = result;
                    break;
                }
            }
        }
        drop(events);

        let outcome = match outcome {
            Ok(()) => output_size(&ticket).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(compressed_size) => self.finish_completed(&ticket, compressed_size),
            Err(e) => self.finish_failed(&ticket, &e),
        }
        guard.disarm();
    }

    fn finish_completed(&self, ticket: &ProcessingTicket, compressed_size: u64) {
        discard_artifact(&ticket.job_id, &ticket.input_path);
        match self
            .store
            .complete(&ticket.job_id, compressed_size, current_timestamp_ms())
        {
            Some(job) => tracing::info!(
                job_id = %job.id,
                original_bytes = job.original_size_bytes,
                compressed_bytes = compressed_size,
                ratio = job.compression_ratio.unwrap_or_default(),
                "Compression completed"
            ),
            None => tracing::warn!(job_id = %ticket.job_id, "Job vanished before completion"),
        }
    }

    fn finish_failed(&self, ticket: &ProcessingTicket, err: &EncodeError) {
        tracing::error!(
            job_id = %ticket.job_id,
            error = %err,
            diagnostics = err.diagnostics().unwrap_or(""),
            "Compression failed"
        );
        discard_artifact(&ticket.job_id, &ticket.input_path);
        discard_artifact(&ticket.job_id, &ticket.output_path);
        self.store
            .fail(&ticket.job_id, FAILURE_SUMMARY, current_timestamp_ms());
    }

    /// Locate the artifact of a completed job
    pub fn download(&self, id: &str) -> Result<Download, JobError> {
        let job = self.store.get(id).ok_or(JobError::NotFound)?;
        if job.status != JobStatus::Completed {
            return Err(JobError::NotReady);
        }
        if !job.output_path.is_file() {
            return Err(JobError::FileMissing);
        }
        Ok(Download {
            file_name: download_file_name(&job.input_file_name),
            path: job.output_path,
        })
    }

    /// Explicit cleanup of a job and its files
    pub fn delete(&self, id: &str) -> Result<(), JobError> {
        let job = self.store.remove(id)?;
        tracing::info!(job_id = %job.id, status = %job.status, "Job deleted");
        Ok(())
    }
}

async fn output_size(ticket: &ProcessingTicket) -> Result<u64, EncodeError> {
    let metadata = tokio::fs::metadata(&ticket.output_path).await?;
    if metadata.len() == 0 {
        return Err(EncodeError::EmptyOutput);
    }
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::scripted::{Outcome, ScriptedEngine};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Fixture {
        _dir: TempDir,
        uploads: PathBuf,
        executor: Arc<JobExecutor>,
    }

    fn fixture(engine: ScriptedEngine, limit: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let uploads = dir.path().join("uploads");
        let outputs = dir.path().join("outputs");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&outputs).unwrap();
        let executor = Arc::new(JobExecutor::new(
            JobStore::new(),
            Arc::new(engine),
            AdmissionController::new(limit),
            outputs,
        ));
        Fixture {
            _dir: dir,
            uploads,
            executor,
        }
    }

    fn upload(fx: &Fixture, name: &str, size_bytes: u64) -> JobView {
        let path = fx.uploads.join(name);
        std::fs::write(&path, b"video").unwrap();
        fx.executor.create_job(NewJob {
            input_file_name: name.to_string(),
            input_path: path,
            size_bytes,
            preset: PresetKey::FullHd1080,
        })
    }

    async fn wait_terminal(executor: &JobExecutor, id: &str) -> Job {
        for _ in 0..200 {
            let job = executor.store().get(id).unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_completed_job_reports_real_size_and_ratio() {
        let fx = fixture(ScriptedEngine::succeeding(40_000_000), 3);
        let j1 = upload(&fx, "holiday.mp4", 100_000_000);

        let started = fx.executor.start(&j1.id).unwrap();
        assert_eq!(started.status, JobStatus::Processing);

        let job = wait_terminal(&fx.executor, &j1.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.compressed_size_bytes, Some(40_000_000));
        assert_eq!(job.view().compression_ratio.as_deref(), Some("60.00"));
        assert_eq!(std::fs::metadata(&job.output_path).unwrap().len(), 40_000_000);
        assert!(!job.input_path.exists());
        assert_eq!(fx.executor.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_receives_resolved_preset_and_paths() {
        let engine = ScriptedEngine::succeeding(10);
        let fx = fixture(engine.clone(), 3);
        let j1 = upload(&fx, "clip.mov", 100);

        fx.executor.start(&j1.id).unwrap();
        let job = wait_terminal(&fx.executor, &j1.id).await;

        let requests = engine.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].preset.key, PresetKey::FullHd1080);
        assert_eq!(requests[0].input_path, job.input_path);
        assert_eq!(requests[0].output_path, job.output_path);
        assert!(job.output_path.to_string_lossy().ends_with(".mov"));
    }

    #[tokio::test]
    async fn test_ceiling_of_one_rejects_second_start() {
        let release = Arc::new(Notify::new());
        let fx = fixture(ScriptedEngine::succeeding(10).gated(release.clone()), 1);
        let j1 = upload(&fx, "a.mp4", 100);
        let j2 = upload(&fx, "b.mp4", 100);

        fx.executor.start(&j1.id).unwrap();
        let err = fx.executor.start(&j2.id).unwrap_err();
        assert!(matches!(err, JobError::Busy { active: 1, limit: 1 }));
        assert_eq!(
            fx.executor.store().get(&j2.id).unwrap().status,
            JobStatus::Uploaded
        );

        release.notify_one();
        let job = wait_terminal(&fx.executor, &j1.id).await;
        assert_eq!(job.status, JobStatus::Completed);

        fx.executor.start(&j2.id).unwrap();
        release.notify_one();
        assert_eq!(
            wait_terminal(&fx.executor, &j2.id).await.status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let fx = fixture(ScriptedEngine::succeeding(10), 3);
        assert!(matches!(fx.executor.start("999"), Err(JobError::NotFound)));
    }

    #[tokio::test]
    async fn test_failure_leaves_no_artifacts() {
        let engine = ScriptedEngine::new(
            vec![5, 20],
            Outcome::Fail {
                partial_output: true,
            },
        );
        let fx = fixture(engine, 3);
        let j1 = upload(&fx, "broken.avi", 1_000);

        fx.executor.start(&j1.id).unwrap();
        let job = wait_terminal(&fx.executor, &j1.id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(FAILURE_SUMMARY));
        assert!(job.completed_at.is_some());
        assert!(!job.input_path.exists());
        assert!(!job.output_path.exists());
        assert_eq!(fx.executor.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_restarting_failed_job_reports_missing_input() {
        let engine = ScriptedEngine::new(
            vec![],
            Outcome::Fail {
                partial_output: false,
            },
        );
        let fx = fixture(engine, 3);
        let j1 = upload(&fx, "broken.mp4", 1_000);

        fx.executor.start(&j1.id).unwrap();
        assert_eq!(
            wait_terminal(&fx.executor, &j1.id).await.status,
            JobStatus::Failed
        );

        let err = fx.executor.start(&j1.id).unwrap_err();
        assert!(matches!(err, JobError::InputMissing));
        assert!(fx.executor.store().get(&j1.id).is_none());
    }

    #[tokio::test]
    async fn test_vanished_engine_fails_job() {
        let fx = fixture(ScriptedEngine::new(vec![30], Outcome::Vanish), 1);
        let j1 = upload(&fx, "a.mp4", 100);

        fx.executor.start(&j1.id).unwrap();
        let job = wait_terminal(&fx.executor, &j1.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(fx.executor.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_fails_job() {
        let fx = fixture(ScriptedEngine::succeeding(0), 3);
        let j1 = upload(&fx, "a.mp4", 100);

        fx.executor.start(&j1.id).unwrap();
        let job = wait_terminal(&fx.executor, &j1.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn test_dropped_guard_frees_slot() {
        let fx = fixture(ScriptedEngine::succeeding(10), 1);
        let j1 = upload(&fx, "a.mp4", 100);
        let store = fx.executor.store().clone();

        let ticket = store
            .begin_processing(&j1.id, &AdmissionController::new(1), 1)
            .unwrap();
        std::fs::write(&ticket.output_path, b"partial").unwrap();
        drop(ProcessingGuard::new(store.clone(), &ticket));

        let job = store.get(&j1.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(store.active_count(), 0);
        assert!(!ticket.input_path.exists());
        assert!(!ticket.output_path.exists());
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_job_alone() {
        let fx = fixture(ScriptedEngine::succeeding(10), 1);
        let j1 = upload(&fx, "a.mp4", 100);
        let store = fx.executor.store().clone();

        let ticket = store
            .begin_processing(&j1.id, &AdmissionController::new(1), 1)
            .unwrap();
        let mut guard = ProcessingGuard::new(store.clone(), &ticket);
        guard.disarm();
        drop(guard);

        assert_eq!(store.get(&j1.id).unwrap().status, JobStatus::Processing);
        assert!(ticket.input_path.exists());
    }

    #[tokio::test]
    async fn test_download_states() {
        let release = Arc::new(Notify::new());
        let fx = fixture(ScriptedEngine::succeeding(10).gated(release.clone()), 3);
        let j1 = upload(&fx, "my \"trip\".mp4", 100);

        assert!(matches!(fx.executor.download("nope"), Err(JobError::NotFound)));
        assert!(matches!(fx.executor.download(&j1.id), Err(JobError::NotReady)));

        fx.executor.start(&j1.id).unwrap();
        assert!(matches!(fx.executor.download(&j1.id), Err(JobError::NotReady)));

        release.notify_one();
        let job = wait_terminal(&fx.executor, &j1.id).await;
        let download = fx.executor.download(&j1.id).unwrap();
        assert_eq!(download.path, job.output_path);
        assert_eq!(download.file_name, "compressed-my _trip_.mp4");

        std::fs::remove_file(&job.output_path).unwrap();
        assert!(matches!(
            fx.executor.download(&j1.id),
            Err(JobError::FileMissing)
        ));
    }

    #[tokio::test]
    async fn test_delete_then_delete_again() {
        let fx = fixture(ScriptedEngine::succeeding(10), 3);
        let j1 = upload(&fx, "a.mp4", 100);
        let input = fx.executor.store().get(&j1.id).unwrap().input_path;

        fx.executor.delete(&j1.id).unwrap();
        assert!(!input.exists());
        assert!(matches!(fx.executor.delete(&j1.id), Err(JobError::NotFound)));
    }

    #[tokio::test]
    async fn test_register_upload_with_unknown_preset_discards_file() {
        let fx = fixture(ScriptedEngine::succeeding(10), 3);
        let path = fx.uploads.join("a.mp4");
        std::fs::write(&path, b"video").unwrap();

        let err = fx
            .executor
            .register_upload("a.mp4".into(), path.clone(), 5, Some("4k"))
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidPreset(_)));
        assert!(!path.exists());
        assert!(fx.executor.store().is_empty());
    }

    #[tokio::test]
    async fn test_register_upload_defaults_preset() {
        let fx = fixture(ScriptedEngine::succeeding(10), 3);
        let path = fx.uploads.join("a.mp4");
        std::fs::write(&path, b"video").unwrap();

        let view = fx
            .executor
            .register_upload("a.mp4".into(), path.clone(), 5, None)
            .unwrap();
        assert_eq!(view.resolution, PresetKey::FullHd1080);

        let path = fx.uploads.join("b.mp4");
        std::fs::write(&path, b"video").unwrap();
        let view = fx
            .executor
            .register_upload("b.mp4".into(), path, 5, Some("720p"))
            .unwrap();
        assert_eq!(view.resolution, PresetKey::Hd720);
    }
}
