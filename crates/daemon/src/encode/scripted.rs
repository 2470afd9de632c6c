//! Deterministic engine for tests: replays a fixed progress script, then
//! writes (or fails to write) the output file.

use super::{EncodeError, EngineEvent, TranscodeEngine, TranscodeRequest, TranscodeRun};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Write a sparse output file of this many bytes and succeed
    Succeed { output_bytes: u64 },
    /// Optionally leave a partial output behind, then fail
    Fail { partial_output: bool },
    /// Close the event channel without a Finished event
    Vanish,
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedEngine {
    progress: Vec<u8>,
    outcome: Outcome,
    /// When set, the run waits for a notification before finishing
    release: Option<Arc<Notify>>,
    requests: Arc<Mutex<Vec<TranscodeRequest>>>,
}

impl ScriptedEngine {
    pub(crate) fn new(progress: Vec<u8>, outcome: Outcome) -> Self {
        Self {
            progress,
            outcome,
            release: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn succeeding(output_bytes: u64) -> Self {
        Self::new(vec![10, 55, 100], Outcome::Succeed { output_bytes })
    }

    /// Hold every run open until `release` is notified once per run
    pub(crate) fn gated(mut self, release: Arc<Notify>) -> Self {
        self.release = Some(release);
        self
    }

    pub(crate) fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().clone()
    }
}

impl TranscodeEngine for ScriptedEngine {
    fn transcode(&self, request: TranscodeRequest) -> TranscodeRun {
        self.requests.lock().push(request.clone());
        let (tx, run) = TranscodeRun::channel(16);
        let engine = self.clone();

        tokio::spawn(async move {
            for pct in engine.progress {
                if tx.send(EngineEvent::Progress(pct)).await.is_err() {
                    return;
                }
            }
            if let Some(release) = engine.release {
                release.notified().await;
            }
            let result = match engine.outcome {
                Outcome::Succeed { output_bytes } => std::fs::File::create(&request.output_path)
                    .and_then(|file| file.set_len(output_bytes))
                    .map_err(EncodeError::Io),
                Outcome::Fail { partial_output } => {
                    if partial_output {
                        let _ = std::fs::write(&request.output_path, b"partial");
                    }
                    Err(EncodeError::Failed {
                        code: 1,
                        stderr: "Invalid data found when processing input".to_string(),
                    })
                }
                Outcome::Vanish => return,
            };
            let _ = tx.send(EngineEvent::Finished(result)).await;
        });

        run
    }
}
