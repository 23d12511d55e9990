//! Compression strategies.
//!
//! Three interchangeable strategies drive the transcoder: `Basic` encodes
//! straight from the preset, `SinglePass` layers advanced overrides on top,
//! and `TwoPass` runs an analysis pass before the real encode. They share
//! one execution flow: validate, probe, transition the task to compressing,
//! run each pass with a scaled progress window, and verify the output.

pub mod basic;
pub mod single_pass;
pub mod two_pass;

pub use basic::BasicStrategy;
pub use single_pass::SinglePassStrategy;
pub use two_pass::TwoPassStrategy;

use crate::errors::{classify_failure, CompressionError, FailureContext};
use crate::events::{CompressionEvent, EventSink};
use crate::ffmpeg::{run_transcode, PassMode, RunOutcome, TranscodeError, TranscodeSpec};
use crate::presets::Preset;
use crate::probe::{probe_media, ProbeError};
use crate::process_registry::ProcessRegistry;
use crate::progress::SharedAggregator;
use crate::tasks::CompressionTask;
use crate::validate::{self, AdvancedSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything a strategy needs to execute one task.
pub struct StrategyContext<'a> {
    pub task: &'a CompressionTask,
    pub preset: &'a Preset,
    pub advanced: Option<&'a AdvancedSettings>,
    pub output_directory: &'a Path,
    pub processes: &'a ProcessRegistry,
    pub aggregator: &'a SharedAggregator,
    pub sink: &'a EventSink,
}

/// Outcome of one task, returned to the batch driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub file: PathBuf,
    pub preset: String,
    pub output_path: Option<PathBuf>,
    pub success: bool,
    pub error: Option<CompressionError>,
}

/// The strategy chosen for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Basic(BasicStrategy),
    SinglePass(SinglePassStrategy),
    TwoPass(TwoPassStrategy),
}

impl Strategy {
    /// Picks the strategy for a task: two-pass when requested, single-pass
    /// when any advanced override is present, basic otherwise.
    pub fn select(advanced: Option<&AdvancedSettings>) -> Self {
        match advanced {
            Some(settings) if settings.two_pass => Strategy::TwoPass(TwoPassStrategy),
            Some(settings) if !settings.is_empty() => Strategy::SinglePass(SinglePassStrategy),
            Some(_) | None => Strategy::Basic(BasicStrategy),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Basic(_) => "basic",
            Strategy::SinglePass(_) => "single_pass",
            Strategy::TwoPass(_) => "two_pass",
        }
    }

    pub async fn execute(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<CompressionResult, CompressionError> {
        match self {
            Strategy::Basic(s) => s.execute(ctx).await,
            Strategy::SinglePass(s) => s.execute(ctx).await,
            Strategy::TwoPass(s) => s.execute(ctx).await,
        }
    }
}

/// The invocation sequence a strategy resolved for its task.
pub(crate) enum EncodePlan {
    Single(TranscodeSpec),
    TwoPass {
        analysis: TranscodeSpec,
        encode: TranscodeSpec,
        passlog: PathBuf,
    },
}

/// Resolves the transcode parameters for a task, applying advanced overrides
/// over the preset where present.
pub(crate) fn resolve_spec(
    ctx: &StrategyContext<'_>,
    advanced: Option<&AdvancedSettings>,
    pass: PassMode,
) -> TranscodeSpec {
    let settings = &ctx.preset.settings;
    TranscodeSpec {
        input: ctx.task.key.file.clone(),
        output: ctx.task.output_path.clone(),
        video_codec: settings.video_codec.clone(),
        video_bitrate: advanced
            .and_then(|a| a.video_bitrate.clone())
            .unwrap_or_else(|| settings.video_bitrate.clone()),
        crf: advanced.and_then(|a| a.crf).unwrap_or(settings.crf),
        speed_preset: settings.speed_preset.clone(),
        fps: advanced.and_then(|a| a.fps).or(settings.fps),
        resolution: advanced.and_then(|a| a.resolution).or(settings.resolution),
        preserve_aspect_ratio: advanced.map(|a| a.preserve_aspect_ratio).unwrap_or(false),
        keep_audio: ctx.task.keep_audio,
        audio_codec: settings.audio_codec.clone(),
        audio_bitrate: advanced
            .and_then(|a| a.audio_bitrate.clone())
            .unwrap_or_else(|| settings.audio_bitrate.clone()),
        fast_start: advanced.map(|a| a.fast_start).unwrap_or(false),
        optimize_for_web: advanced.map(|a| a.optimize_for_web).unwrap_or(false),
        pass,
    }
}

/// Shared execution flow for every strategy.
pub(crate) async fn run_plan(
    ctx: &StrategyContext<'_>,
    plan: EncodePlan,
) -> Result<CompressionResult, CompressionError> {
    validate::validate_input_file(&ctx.task.key.file).await?;
    validate::validate_preset(ctx.preset)?;
    if let Some(advanced) = ctx.advanced {
        validate::validate_advanced(advanced)?;
    }

    let failure_ctx = FailureContext {
        file_name: &ctx.task.file_name,
        preset_id: &ctx.task.preset_id,
        codec: &ctx.preset.settings.video_codec,
    };

    let info = match probe_media(&ctx.task.key.file).await {
        Ok(info) => info,
        Err(ProbeError::FfprobeFailed(stderr)) => {
            return Err(classify_failure(&stderr, &failure_ctx));
        }
        Err(ProbeError::Parse(detail)) => {
            return Err(CompressionError::transcoder(format!(
                "'{}' could not be probed",
                ctx.task.file_name
            ))
            .with_detail(detail));
        }
        Err(ProbeError::Io(e)) => {
            return Err(
                CompressionError::system("ffprobe could not be started").with_detail(e.to_string())
            );
        }
    };
    if !info.has_video {
        return Err(CompressionError::validation(format!(
            "'{}' has no video stream",
            ctx.task.file_name
        )));
    }

    if let Ok(mut aggregator) = ctx.aggregator.lock() {
        aggregator.mark_compressing(&ctx.task.key, Instant::now());
    }

    match plan {
        EncodePlan::Single(spec) => {
            run_pass(ctx, &spec, info.duration_secs, &failure_ctx, 0.0, 100.0).await?;
            verify_output(&spec.output, &ctx.task.file_name).await?;
        }
        EncodePlan::TwoPass {
            analysis,
            encode,
            passlog,
        } => {
            run_pass(ctx, &analysis, info.duration_secs, &failure_ctx, 0.0, 50.0).await?;
            run_pass(ctx, &encode, info.duration_secs, &failure_ctx, 50.0, 100.0).await?;
            cleanup_passlog(&passlog).await;
            verify_output(&encode.output, &ctx.task.file_name).await?;
        }
    }

    Ok(CompressionResult {
        file: ctx.task.key.file.clone(),
        preset: ctx.task.preset_id.clone(),
        output_path: Some(ctx.task.output_path.clone()),
        success: true,
        error: None,
    })
}

/// Runs one invocation, mapping its 0-100 progress onto [lo, hi].
async fn run_pass(
    ctx: &StrategyContext<'_>,
    spec: &TranscodeSpec,
    duration_secs: f64,
    failure_ctx: &FailureContext<'_>,
    lo: f32,
    hi: f32,
) -> Result<(), CompressionError> {
    let key = &ctx.task.key;
    let outcome = run_transcode(spec, duration_secs, key, ctx.processes, |update| {
        let scaled = scale_percent(update.percent, lo, hi);
        let emitted = ctx
            .aggregator
            .lock()
            .ok()
            .and_then(|mut agg| agg.update_progress(key, scaled, Instant::now()));
        if let Some(percent) = emitted {
            let _ = ctx.sink.send(CompressionEvent::Progress {
                file: ctx.task.file_name.clone(),
                preset: ctx.task.preset_id.clone(),
                percent,
                timemark: update.timemark,
            });
        }
    })
    .await;

    match outcome {
        Ok(RunOutcome::Completed) => Ok(()),
        Ok(RunOutcome::Cancelled) => {
            let _ = tokio::fs::remove_file(&spec.output).await;
            Err(CompressionError::cancelled())
        }
        Err(TranscodeError::ExitFailure { stderr, .. }) => {
            let _ = tokio::fs::remove_file(&spec.output).await;
            Err(classify_failure(&stderr, failure_ctx))
        }
        Err(TranscodeError::Spawn(e)) => {
            Err(CompressionError::system("transcoder could not be started")
                .with_detail(e.to_string()))
        }
        Err(TranscodeError::Io(e)) => {
            let _ = tokio::fs::remove_file(&spec.output).await;
            Err(CompressionError::system("transcoder io failure").with_detail(e.to_string()))
        }
    }
}

/// Maps a pass-local percentage onto its slice of the task's progress.
pub(crate) fn scale_percent(percent: f32, lo: f32, hi: f32) -> f32 {
    lo + percent.clamp(0.0, 100.0) * (hi - lo) / 100.0
}

/// A completed encode must have produced a non-empty output file.
async fn verify_output(output: &Path, file_name: &str) -> Result<(), CompressionError> {
    match tokio::fs::metadata(output).await {
        Ok(metadata) if metadata.len() > 0 => Ok(()),
        Ok(_) => {
            let _ = tokio::fs::remove_file(output).await;
            Err(CompressionError::transcoder(format!(
                "output for '{}' is empty",
                file_name
            )))
        }
        Err(e) => Err(CompressionError::transcoder(format!(
            "output for '{}' was not produced",
            file_name
        ))
        .with_detail(e.to_string())),
    }
}

/// Removes the two-pass statistics artifacts after the second pass.
async fn cleanup_passlog(passlog: &Path) {
    let base = passlog.to_string_lossy();
    for suffix in ["-0.log", "-0.log.mbtree"] {
        let _ = tokio::fs::remove_file(format!("{}{}", base, suffix)).await;
    }
}
