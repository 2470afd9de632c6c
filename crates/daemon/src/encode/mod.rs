//! Encoding modules for vidsqueeze
//!
//! A transcode is exposed as a [`TranscodeRun`]: a finite, lazily consumed
//! sequence of progress events ending in exactly one `Finished` event.
//! Dropping the run cancels the transcode.

pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod scripted;

pub use ffmpeg::{build_ffmpeg_command, FfmpegEngine};

use crate::presets::Preset;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The engine binary could not be started
    #[error("Failed to start transcoder: {0}")]
    Spawn(std::io::Error),

    /// Transcoder exited with non-zero status
    #[error("Transcoder failed with exit code: {code}")]
    Failed { code: i32, stderr: String },

    /// Transcoder was terminated by signal
    #[error("Transcoder process was terminated by signal")]
    Terminated { stderr: String },

    /// IO error while supervising the transcoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run ended without reporting an outcome, or was cancelled
    #[error("Transcode aborted before reporting an outcome")]
    Aborted,

    /// Reported success but left no usable output behind
    #[error("Transcoder produced an empty output file")]
    EmptyOutput,
}

impl EncodeError {
    /// Raw engine diagnostics, for operator logs only
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            EncodeError::Failed { stderr, .. } | EncodeError::Terminated { stderr } => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

/// One event of a transcode run
#[derive(Debug)]
pub enum EngineEvent {
    /// Percentage in 0..=100; best effort and not necessarily monotonic
    Progress(u8),
    Finished(Result<(), EncodeError>),
}

impl EngineEvent {
    /// Progress event from a raw engine value, clamped to [0, 100]
    pub fn progress(raw: f64) -> Self {
        let pct = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 100.0) };
        EngineEvent::Progress(pct.round() as u8)
    }
}

/// What to transcode and how
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub preset: &'static Preset,
}

/// Consumer side of a running transcode
#[derive(Debug)]
pub struct TranscodeRun {
    events: mpsc::Receiver<EngineEvent>,
    finished: bool,
}

impl TranscodeRun {
    /// Create a run and the sender an engine reports through
    pub fn channel(buffer: usize) -> (mpsc::Sender<EngineEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                events: rx,
                finished: false,
            },
        )
    }

    /// Next event, or None once `Finished` has been yielded.
    ///
    /// If the engine side goes away without finishing, a single
    /// `Finished(Err(Aborted))` is synthesized.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(EngineEvent::Finished(result)) => {
                self.finished = true;
                Some(EngineEvent::Finished(result))
            }
            Some(EngineEvent::Progress(pct)) => Some(EngineEvent::Progress(pct.min(100))),
            None => {
                self.finished = true;
                Some(EngineEvent::Finished(Err(EncodeError::Aborted)))
            }
        }
    }
}

/// External transcoding engine
pub trait TranscodeEngine: Send + Sync {
    /// Start transcoding. Failures to launch are reported through the run.
    fn transcode(&self, request: TranscodeRequest) -> TranscodeRun;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        assert!(matches!(EngineEvent::progress(-5.0), EngineEvent::Progress(0)));
        assert!(matches!(EngineEvent::progress(42.4), EngineEvent::Progress(42)));
        assert!(matches!(EngineEvent::progress(180.0), EngineEvent::Progress(100)));
        assert!(matches!(EngineEvent::progress(f64::NAN), EngineEvent::Progress(0)));
    }

    #[tokio::test]
    async fn test_run_ends_after_finished() {
        let (tx, mut run) = TranscodeRun::channel(4);
        tx.send(EngineEvent::Progress(10)).await.unwrap();
        tx.send(EngineEvent::Finished(Ok(()))).await.unwrap();
        tx.send(EngineEvent::Progress(99)).await.unwrap();

        assert!(matches!(run.next().await, Some(EngineEvent::Progress(10))));
        assert!(matches!(run.next().await, Some(EngineEvent::Finished(Ok(())))));
        assert!(run.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sender_yields_aborted() {
        let (tx, mut run) = TranscodeRun::channel(4);
        drop(tx);
        assert!(matches!(
            run.next().await,
            Some(EngineEvent::Finished(Err(EncodeError::Aborted)))
        ));
        assert!(run.next().await.is_none());
    }

    #[test]
    fn test_diagnostics_only_for_engine_output() {
        let err = EncodeError::Failed {
            code: 1,
            stderr: "moov atom not found".to_string(),
        };
        assert_eq!(err.diagnostics(), Some("moov atom not found"));
        assert_eq!(EncodeError::Aborted.diagnostics(), None);
    }
}
