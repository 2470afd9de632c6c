//! ffmpeg transcoder module for vidsqueeze
//!
//! Builds the H.264/AAC ffmpeg command for a preset and supervises the child
//! process, turning its `-progress` output into [`EngineEvent`]s.

use super::{EncodeError, EngineEvent, TranscodeEngine, TranscodeRequest, TranscodeRun};
use crate::ConcurrencyPlan;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};

/// Number of stderr lines kept for failure diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// Fixed encoder options shared by every preset
const COMMON_OUTPUT_ARGS: &[&str] = &[
    "-c:v",
    "libx264",
    "-c:a",
    "aac",
    "-pix_fmt",
    "yuv420p",
    "-profile:v",
    "high",
    "-level",
    "4.2",
    "-movflags",
    "+faststart",
    "-map_metadata",
    "0",
    "-metadata:s:v:0",
    "rotate=0",
];

/// ffmpeg-backed [`TranscodeEngine`]
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    threads_per_job: u32,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: PathBuf, plan: &ConcurrencyPlan) -> Self {
        Self {
            ffmpeg_path,
            threads_per_job: plan.threads_per_job,
        }
    }
}

/// Build an ffmpeg command for a transcode request
///
/// Creates a Command configured with:
/// - Overwrite, input path, and machine-readable progress on stdout
/// - libx264/aac with the preset's CRF, speed, and audio bitrate
/// - The preset's scale filter and video bitrate cap, when it has them
/// - A fixed thread count from the concurrency plan
/// - The output path last
pub fn build_ffmpeg_command(
    ffmpeg_path: &Path,
    request: &TranscodeRequest,
    threads: u32,
) -> Command {
    let preset = request.preset;
    let mut cmd = Command::new(ffmpeg_path);

    cmd.arg("-hide_banner").arg("-y");
    cmd.arg("-i").arg(&request.input_path);

    cmd.args(COMMON_OUTPUT_ARGS);
    cmd.arg("-preset").arg(preset.speed);
    cmd.arg("-crf").arg(preset.crf.to_string());
    cmd.arg("-b:a").arg(format!("{}k", preset.audio_bitrate_kbps));

    if let Some(scale) = preset.scale {
        cmd.arg("-vf").arg(scale.filter());
    }

    if let Some(kbps) = preset.video_bitrate_kbps {
        cmd.arg("-b:v").arg(format!("{}k", kbps));
    }

    cmd.arg("-threads").arg(threads.max(1).to_string());
    cmd.arg("-progress").arg("pipe:1").arg("-nostats");

    cmd.arg(&request.output_path);
    cmd
}

/// Parse `HH:MM:SS.ff` into seconds
pub fn parse_timestamp(ts: &str) -> Option<f64> {
    let mut parts = ts.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extract the input duration from ffmpeg's `Duration: 00:01:02.50, start: ...`
/// banner line. `Duration: N/A` yields None.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_timestamp(value).filter(|d| *d > 0.0)
}

/// Extract the encoded position in microseconds from a `-progress` line.
///
/// ffmpeg reports microseconds under both `out_time_us` and the misnamed
/// `out_time_ms` key.
pub fn parse_out_time_us(line: &str) -> Option<i64> {
    let value = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    value.trim().parse::<i64>().ok().filter(|us| *us >= 0)
}

/// Percentage of `duration_secs` covered by `out_time_us`, clamped to [0, 100]
pub fn progress_percent(out_time_us: i64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 {
        return 0;
    }
    match EngineEvent::progress(out_time_us as f64 / 1_000_000.0 / duration_secs * 100.0) {
        EngineEvent::Progress(pct) => pct,
        EngineEvent::Finished(_) => 0,
    }
}

impl TranscodeEngine for FfmpegEngine {
    fn transcode(&self, request: TranscodeRequest) -> TranscodeRun {
        let (tx, run) = TranscodeRun::channel(32);
        let cmd = build_ffmpeg_command(&self.ffmpeg_path, &request, self.threads_per_job);
        tracing::debug!(job_id = %request.job_id, command = ?cmd, "Launching ffmpeg");

        tokio::spawn(async move {
            let result = supervise(cmd, &tx).await;
            let _ = tx.send(EngineEvent::Finished(result)).await;
        });

        run
    }
}

/// Run the child to completion, forwarding progress to `tx`.
///
/// Returns `Aborted` (after killing the child) if the consumer drops the run.
async fn supervise(cmd: Command, tx: &mpsc::Sender<EngineEvent>) -> Result<(), EncodeError> {
    let mut cmd = tokio::process::Command::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(EncodeError::Spawn)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EncodeError::Io(std::io::Error::other("ffmpeg stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EncodeError::Io(std::io::Error::other("ffmpeg stderr not captured")))?;

    let (duration_tx, duration_rx) = watch::channel(None::<f64>);
    let stderr_task = tokio::spawn(collect_stderr(stderr, duration_tx));

    let mut lines = BufReader::new(stdout).lines();
    let mut out_time_us: Option<i64> = None;
    let mut last_sent: Option<u8> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tx.closed() => {
                let _ = child.kill().await;
                return Err(EncodeError::Aborted);
            }
        };
        let Some(line) = line else { break };

        if let Some(us) = parse_out_time_us(&line) {
            out_time_us = Some(us);
        } else if line.starts_with("progress=") {
            let duration = *duration_rx.borrow();
            if let (Some(us), Some(duration)) = (out_time_us, duration) {
                let pct = progress_percent(us, duration);
                if last_sent != Some(pct) {
                    if tx.send(EngineEvent::Progress(pct)).await.is_err() {
                        let _ = child.kill().await;
                        return Err(EncodeError::Aborted);
                    }
                    last_sent = Some(pct);
                }
            }
        }
    }

    let status = child.wait().await?;
    let stderr_tail = stderr_task.await.unwrap_or_default();

    if status.success() {
        if last_sent != Some(100) {
            let _ = tx.send(EngineEvent::Progress(100)).await;
        }
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(EncodeError::Failed {
            code,
            stderr: stderr_tail,
        }),
        None => Err(EncodeError::Terminated {
            stderr: stderr_tail,
        }),
    }
}

/// Read stderr to the end, publishing the input duration once seen and
/// returning the last [`STDERR_TAIL_LINES`] lines.
async fn collect_stderr<R>(stderr: R, duration_tx: watch::Sender<Option<f64>>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stderr).split(b'\n');
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(segment)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&segment).trim_end().to_string();
        if duration_tx.borrow().is_none() {
            if let Some(duration) = parse_duration_line(&line) {
                let _ = duration_tx.send(Some(duration));
            }
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}
