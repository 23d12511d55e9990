//! Transcoder invocation: argument building, progress parsing, and the
//! shared subprocess runner.
//!
//! All strategies funnel into `run_transcode`, which registers a cancel
//! handle, spawns ffmpeg with a machine-readable progress stream on stdout,
//! and either awaits a clean exit or force-kills the child on cancellation.

use crate::presets::Resolution;
use crate::process_registry::ProcessRegistry;
use crate::tasks::TaskKey;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Error type for a single transcoder invocation.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The transcoder binary could not be started.
    #[error("failed to start transcoder: {0}")]
    Spawn(std::io::Error),

    /// The transcoder exited with a failure status.
    #[error("transcoder exited with code {code:?}")]
    ExitFailure { code: Option<i32>, stderr: String },

    /// IO error reading the progress stream or awaiting the child.
    #[error("transcoder io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How one invocation participates in the encode.
#[derive(Debug, Clone, PartialEq)]
pub enum PassMode {
    /// Single invocation producing the final output.
    Single,
    /// First pass of a two-pass encode: statistics only, output discarded.
    Analysis { passlog: PathBuf },
    /// Second pass of a two-pass encode using pass-1 statistics.
    Encode { passlog: PathBuf },
}

/// Fully resolved parameters for one transcoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub video_codec: String,
    pub video_bitrate: String,
    pub crf: u8,
    pub speed_preset: String,
    pub fps: Option<u32>,
    pub resolution: Option<Resolution>,
    pub preserve_aspect_ratio: bool,
    pub keep_audio: bool,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub fast_start: bool,
    pub optimize_for_web: bool,
    pub pass: PassMode,
}

/// Null output sink for analysis passes.
pub fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

fn codec_supports_speed_preset(codec: &str) -> bool {
    let lower = codec.to_ascii_lowercase();
    lower.contains("x264") || lower.contains("x265")
}

fn is_mp4_output(output: &Path) -> bool {
    output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false)
}

/// Builds the ffmpeg argument vector for one invocation.
pub fn build_ffmpeg_args(spec: &TranscodeSpec) -> Vec<String> {
    let analysis = matches!(spec.pass, PassMode::Analysis { .. });
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-i".to_string(),
        spec.input.to_string_lossy().into_owned(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    args.push("-c:v".to_string());
    args.push(spec.video_codec.clone());
    args.push("-b:v".to_string());
    args.push(spec.video_bitrate.clone());
    args.push("-crf".to_string());
    args.push(spec.crf.to_string());
    if codec_supports_speed_preset(&spec.video_codec) {
        args.push("-preset".to_string());
        args.push(spec.speed_preset.clone());
    }

    if let Some(res) = &spec.resolution {
        let filter = if spec.preserve_aspect_ratio {
            format!("scale={}:-2", res.width)
        } else {
            format!("scale={}:{}", res.width, res.height)
        };
        args.push("-vf".to_string());
        args.push(filter);
    }

    if let Some(fps) = spec.fps {
        args.push("-r".to_string());
        args.push(fps.to_string());
    }

    if analysis || !spec.keep_audio {
        args.push("-an".to_string());
    } else {
        args.push("-c:a".to_string());
        args.push(spec.audio_codec.clone());
        args.push("-b:a".to_string());
        args.push(spec.audio_bitrate.clone());
    }

    if !analysis && spec.fast_start && is_mp4_output(&spec.output) {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }

    if !analysis && spec.optimize_for_web && codec_supports_speed_preset(&spec.video_codec) {
        args.push("-profile:v".to_string());
        args.push("baseline".to_string());
        args.push("-level".to_string());
        args.push("3.0".to_string());
    }

    match &spec.pass {
        PassMode::Single => {
            args.push(spec.output.to_string_lossy().into_owned());
        }
        PassMode::Analysis { passlog } => {
            args.push("-pass".to_string());
            args.push("1".to_string());
            args.push("-passlogfile".to_string());
            args.push(passlog.to_string_lossy().into_owned());
            args.push("-f".to_string());
            args.push("null".to_string());
            args.push(null_device().to_string());
        }
        PassMode::Encode { passlog } => {
            args.push("-pass".to_string());
            args.push("2".to_string());
            args.push("-passlogfile".to_string());
            args.push(passlog.to_string_lossy().into_owned());
            args.push(spec.output.to_string_lossy().into_owned());
        }
    }

    args
}

/// One parsed progress report from the transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Percent of this invocation in [0, 100].
    pub percent: f32,
    /// Transcoder timemark, e.g. "00:01:30.25".
    pub timemark: String,
}

/// Incremental parser for ffmpeg's `-progress` key=value stream.
///
/// Each report block ends with a `progress=` line; one `ProgressUpdate` is
/// produced per block.
#[derive(Debug)]
pub struct ProgressParser {
    duration_secs: f64,
    out_time_secs: f64,
    timemark: String,
}

impl ProgressParser {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            out_time_secs: 0.0,
            timemark: String::new(),
        }
    }

    /// Feeds one line of the progress stream.
    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let (key, value) = line.split_once('=')?;
        match key.trim() {
            // out_time_ms is in microseconds despite the name.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<i64>() {
                    if us >= 0 {
                        self.out_time_secs = us as f64 / 1_000_000.0;
                    }
                }
                None
            }
            "out_time" => {
                let timemark = value.trim();
                if let Some(secs) = parse_timemark_secs(timemark) {
                    self.out_time_secs = secs;
                    self.timemark = timemark.to_string();
                }
                None
            }
            "progress" => Some(ProgressUpdate {
                percent: self.percent(),
                timemark: self.timemark.clone(),
            }),
            _ => None,
        }
    }

    fn percent(&self) -> f32 {
        if self.duration_secs > 0.0 {
            ((self.out_time_secs / self.duration_secs) * 100.0).clamp(0.0, 100.0) as f32
        } else {
            0.0
        }
    }
}

/// Parses an `HH:MM:SS.frac` timemark into seconds.
pub fn parse_timemark_secs(timemark: &str) -> Option<f64> {
    let mut parts = timemark.split(':');
    let hours = parts.next()?.parse::<f64>().ok()?;
    let minutes = parts.next()?.parse::<f64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Outcome of a transcoder invocation that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Runs one transcoder invocation to completion or cancellation.
///
/// The cancel handle is registered under the task key before the child is
/// spawned and deregistered before returning; receiving the cancel signal
/// force-kills the child.
pub async fn run_transcode(
    spec: &TranscodeSpec,
    duration_secs: f64,
    key: &TaskKey,
    registry: &ProcessRegistry,
    mut on_progress: impl FnMut(ProgressUpdate),
) -> Result<RunOutcome, TranscodeError> {
    let mut cancel_rx = registry.register(key);
    let args = build_ffmpeg_args(spec);
    tracing::debug!("spawning ffmpeg for {}: {:?}", key, args);

    let mut child = match Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            registry.deregister(key);
            return Err(TranscodeError::Spawn(e));
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    let mut parser = ProgressParser::new(duration_secs);
    let mut cancelled = false;

    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(update) = parser.feed(&line) {
                            on_progress(update);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }
    }

    if cancelled {
        let _ = child.kill().await;
        let _ = child.wait().await;
        stderr_task.abort();
        registry.deregister(key);
        return Ok(RunOutcome::Cancelled);
    }

    let status = tokio::select! {
        _ = &mut cancel_rx => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            stderr_task.abort();
            registry.deregister(key);
            return Ok(RunOutcome::Cancelled);
        }
        status = child.wait() => status,
    };

    registry.deregister(key);
    let stderr_text = stderr_task.await.unwrap_or_default();

    match status {
        Ok(status) if status.success() => Ok(RunOutcome::Completed),
        Ok(status) => Err(TranscodeError::ExitFailure {
            code: status.code(),
            stderr: stderr_text,
        }),
        Err(e) => Err(TranscodeError::Io(e)),
    }
}
