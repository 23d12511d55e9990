//! vidpress
//!
//! Batch video compression orchestration: task expansion, concurrency-bounded
//! scheduling of external transcodes, progress smoothing and aggregation,
//! thermal-aware admission control, and structured error classification with
//! cleanup guarantees.

pub mod batch;
pub mod errors;
pub mod events;
pub mod ffmpeg;
pub mod presets;
pub mod probe;
pub mod process_registry;
pub mod progress;
pub mod scheduler;
pub mod startup;
pub mod strategy;
pub mod tasks;
pub mod thermal;
pub mod validate;

pub use vidpress_config as config;
pub use vidpress_config::Config;

pub use batch::{BatchRequest, Compressor, CompressorOptions};
pub use errors::{classify_failure, CompressionError, ErrorKind, ErrorSummary, FailureContext};
pub use events::{event_channel, CompressionEvent, EventSink};
pub use ffmpeg::{build_ffmpeg_args, PassMode, ProgressParser, ProgressUpdate, TranscodeSpec};
pub use presets::{
    Preset, PresetCategory, PresetRegistry, PresetSettings, Resolution, CUSTOM_PRESET_PREFIX,
};
pub use probe::{probe_media, MediaInfo, ProbeError};
pub use process_registry::ProcessRegistry;
pub use progress::{BatchSnapshot, ProgressAggregator, SharedAggregator, SmoothingPolicy};
pub use scheduler::{default_concurrency, default_concurrency_for};
pub use startup::{
    check_ffmpeg_available, check_ffprobe_available, parse_ffmpeg_version, run_startup_checks,
    StartupError,
};
pub use strategy::{
    BasicStrategy, CompressionResult, SinglePassStrategy, Strategy, StrategyContext,
    TwoPassStrategy,
};
pub use tasks::{
    container_for_codec, expand_tasks, CompressionTask, PresetConfig, TaskKey, TaskStatus,
};
pub use thermal::{ThermalAction, ThermalConfig, ThermalMonitor, ThermalStatus};
pub use validate::AdvancedSettings;
