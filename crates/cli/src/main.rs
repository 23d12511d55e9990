//! CLI entry point for vidpress.
//!
//! Expands the input arguments, builds one batch request, and renders the
//! orchestrator's event stream to the terminal. Ctrl-C cancels the whole
//! batch.

mod scan;

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use vidpress::{
    event_channel, AdvancedSettings, BatchRequest, CompressionEvent, Compressor,
    CompressorOptions, Config, Preset, PresetConfig, Resolution,
};

/// vidpress - batch video compression against named presets
#[derive(Parser, Debug)]
#[command(name = "vidpress")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video files or directories (directories are scanned recursively)
    #[arg(required_unless_present = "list_presets")]
    inputs: Vec<PathBuf>,

    /// Preset id to compress against (repeatable)
    #[arg(short, long, default_values_t = vec!["web-standard".to_string()])]
    preset: Vec<String>,

    /// Drop the audio track from the outputs
    #[arg(long)]
    strip_audio: bool,

    /// Output directory (defaults to the config value or ./compressed)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Quality factor override (0-51, lower is higher quality)
    #[arg(long)]
    crf: Option<u8>,

    /// Video bitrate override, e.g. 2500k
    #[arg(long)]
    video_bitrate: Option<String>,

    /// Audio bitrate override, e.g. 128k
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Frame rate override (1-120)
    #[arg(long)]
    fps: Option<u32>,

    /// Resolution override, e.g. 1280x720
    #[arg(long)]
    resolution: Option<Resolution>,

    /// Keep the source aspect ratio when scaling
    #[arg(long)]
    preserve_aspect_ratio: bool,

    /// Encode in two passes for a more accurate bitrate target
    #[arg(long)]
    two_pass: bool,

    /// Reorganize mp4 output for progressive playback
    #[arg(long)]
    fast_start: bool,

    /// Constrain H.264 output to a baseline profile for web players
    #[arg(long)]
    optimize_for_web: bool,

    /// Maximum concurrent compressions (1-6)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a JSON file of custom presets to merge at startup
    #[arg(long)]
    presets_file: Option<PathBuf>,

    /// List the available presets and exit
    #[arg(long)]
    list_presets: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn advanced_settings(&self) -> Option<AdvancedSettings> {
        let settings = AdvancedSettings {
            crf: self.crf,
            video_bitrate: self.video_bitrate.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
            fps: self.fps,
            resolution: self.resolution,
            preserve_aspect_ratio: self.preserve_aspect_ratio,
            two_pass: self.two_pass,
            fast_start: self.fast_start,
            optimize_for_web: self.optimize_for_web,
            max_concurrent: self.max_concurrent,
        };
        if settings.is_empty() {
            None
        } else {
            Some(settings)
        }
    }
}

fn load_custom_presets(path: &PathBuf) -> Option<HashMap<String, Preset>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("could not read presets file '{}': {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("could not parse presets file '{}': {}", path.display(), e);
            None
        }
    }
}

fn list_presets(compressor: &Compressor) {
    let mut entries: Vec<_> = compressor.presets().get_all().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (id, preset) in entries {
        println!(
            "{:<24} [{}] {} ({}, crf {}, {})",
            id,
            preset.category,
            preset.name,
            preset.settings.video_codec,
            preset.settings.crf,
            preset.settings.video_bitrate,
        );
    }
}

fn render_event(event: CompressionEvent) {
    match event {
        CompressionEvent::Started { file, preset, output_path } => {
            info!("queued {} [{}] -> {}", file, preset, output_path.display());
        }
        CompressionEvent::Progress { file, preset, percent, timemark } => {
            if timemark.is_empty() {
                info!("{} [{}] {:.1}%", file, preset, percent);
            } else {
                info!("{} [{}] {:.1}% ({})", file, preset, percent, timemark);
            }
        }
        CompressionEvent::BatchProgress(snapshot) => {
            info!(
                "batch {:.1}% - {}/{} done, {} failed, {} cancelled, ~{}s remaining",
                snapshot.overall_progress,
                snapshot.completed_tasks,
                snapshot.total_tasks,
                snapshot.failed_tasks,
                snapshot.cancelled_tasks,
                snapshot.estimated_time_remaining_secs,
            );
        }
        CompressionEvent::Complete { file, preset, output_path, success } => {
            if success {
                info!("finished {} [{}] -> {}", file, preset, output_path.display());
            } else {
                info!("cancelled {} [{}]", file, preset);
            }
        }
        CompressionEvent::Error { file, preset, error } => {
            error!("failed {} [{}]: {}", file, preset, error);
            if let Some(suggestion) = error.suggested_action {
                error!("  suggestion: {}", suggestion);
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if args.verbose { "debug" } else { "info" })
        .init();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let mut options = CompressorOptions::from_config(&config);
    if let Some(limit) = args.max_concurrent {
        options.max_concurrent = Some(limit);
    }

    let mut compressor = Compressor::new(options);
    if let Some(path) = &args.presets_file {
        if let Some(store) = load_custom_presets(path) {
            compressor.presets_mut().load(store);
        }
    }

    if args.list_presets {
        list_presets(&compressor);
        return ExitCode::SUCCESS;
    }

    match vidpress::run_startup_checks().await {
        Ok(version) => info!("using ffmpeg {}", version),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let files = scan::collect_video_files(&args.inputs);
    if files.is_empty() {
        error!("no video files found in the given inputs");
        return ExitCode::FAILURE;
    }
    info!("{} video file(s) queued", files.len());

    let output_directory = args
        .output_dir
        .clone()
        .or_else(|| config.output.directory.clone())
        .unwrap_or_else(|| PathBuf::from("compressed"));

    let request = BatchRequest {
        files,
        preset_configs: args
            .preset
            .iter()
            .map(|id| PresetConfig::new(id.clone(), !args.strip_audio))
            .collect(),
        output_directory,
        output_names: HashMap::new(),
        advanced: args.advanced_settings(),
    };

    let compressor = Arc::new(compressor);
    let canceller = compressor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling batch");
            canceller.cancel_all();
        }
    });

    let (sink, mut rx) = event_channel();
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render_event(event);
        }
    });

    let results = match compressor.run_batch(request, sink).await {
        Ok(results) => results,
        Err(e) => {
            error!("batch aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _ = renderer.await;

    let completed = results.iter().filter(|r| r.success).count();
    let cancelled = results
        .iter()
        .filter(|r| r.error.as_ref().map(|e| e.is_cancellation()).unwrap_or(false))
        .count();
    let failed = results.len() - completed - cancelled;
    info!(
        "batch summary: {} completed, {} failed, {} cancelled",
        completed, failed, cancelled
    );

    if completed == results.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
