//! Pre-spawn validation for batch inputs and advanced overrides.
//!
//! Every strategy validates before a subprocess exists; any violation fails
//! fast with a validation-kind error.

use crate::errors::CompressionError;
use crate::presets::{Preset, Resolution};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Bounds for override range checks.
pub const MAX_CRF: u8 = 51;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;
pub const MIN_CONCURRENT: usize = 1;
pub const MAX_CONCURRENT: usize = 6;

/// Caller-supplied overrides applied on top of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Quality factor override (0-51).
    pub crf: Option<u8>,
    /// Video bitrate override, formatted as `<integer>k`.
    pub video_bitrate: Option<String>,
    /// Audio bitrate override, formatted as `<integer>k`.
    pub audio_bitrate: Option<String>,
    /// Frame rate override (1-120).
    pub fps: Option<u32>,
    /// Resolution override.
    pub resolution: Option<Resolution>,
    /// Scale to the target width keeping the source aspect ratio.
    pub preserve_aspect_ratio: bool,
    /// Run the two-pass strategy.
    pub two_pass: bool,
    /// Reorganize the container for progressive playback.
    pub fast_start: bool,
    /// Constrain the encode to a baseline profile for web players.
    pub optimize_for_web: bool,
    /// Concurrency ceiling override (1-6).
    pub max_concurrent: Option<usize>,
}

impl AdvancedSettings {
    /// Whether any override differs from the defaults.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Checks that a bitrate string is formatted as `<integer>k`.
pub fn is_bitrate_format(s: &str) -> bool {
    match s.strip_suffix('k') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Range-checks advanced overrides.
pub fn validate_advanced(settings: &AdvancedSettings) -> Result<(), CompressionError> {
    if let Some(crf) = settings.crf {
        if crf > MAX_CRF {
            return Err(CompressionError::validation(format!(
                "quality factor {} is out of range 0-{}",
                crf, MAX_CRF
            )));
        }
    }

    if let Some(fps) = settings.fps {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(CompressionError::validation(format!(
                "frame rate {} is out of range {}-{}",
                fps, MIN_FPS, MAX_FPS
            )));
        }
    }

    for (label, bitrate) in [
        ("video bitrate", &settings.video_bitrate),
        ("audio bitrate", &settings.audio_bitrate),
    ] {
        if let Some(value) = bitrate {
            if !is_bitrate_format(value) {
                return Err(CompressionError::validation(format!(
                    "{} '{}' must be formatted as <integer>k",
                    label, value
                )));
            }
        }
    }

    if let Some(limit) = settings.max_concurrent {
        if !(MIN_CONCURRENT..=MAX_CONCURRENT).contains(&limit) {
            return Err(CompressionError::validation(format!(
                "concurrency limit {} is out of range {}-{}",
                limit, MIN_CONCURRENT, MAX_CONCURRENT
            )));
        }
    }

    Ok(())
}

/// Checks that a preset carries every setting a strategy needs.
pub fn validate_preset(preset: &Preset) -> Result<(), CompressionError> {
    let s = &preset.settings;
    if s.video_codec.is_empty() {
        return Err(CompressionError::validation(format!(
            "preset '{}' has no video codec",
            preset.name
        )));
    }
    if !is_bitrate_format(&s.video_bitrate) {
        return Err(CompressionError::validation(format!(
            "preset '{}' has malformed video bitrate '{}'",
            preset.name, s.video_bitrate
        )));
    }
    if s.audio_codec.is_empty() || !is_bitrate_format(&s.audio_bitrate) {
        return Err(CompressionError::validation(format!(
            "preset '{}' has incomplete audio settings",
            preset.name
        )));
    }
    if s.crf > MAX_CRF {
        return Err(CompressionError::validation(format!(
            "preset '{}' quality factor {} exceeds {}",
            preset.name, s.crf, MAX_CRF
        )));
    }
    if s.speed_preset.is_empty() {
        return Err(CompressionError::validation(format!(
            "preset '{}' has no encoder speed label",
            preset.name
        )));
    }
    Ok(())
}

/// Checks that the input file exists and is readable.
pub async fn validate_input_file(path: &Path) -> Result<(), CompressionError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        CompressionError::validation(format!("input file '{}' is not accessible", path.display()))
            .with_detail(e.to_string())
    })?;
    if !metadata.is_file() {
        return Err(CompressionError::validation(format!(
            "input path '{}' is not a regular file",
            path.display()
        )));
    }
    tokio::fs::File::open(path).await.map_err(|e| {
        CompressionError::validation(format!("input file '{}' is not readable", path.display()))
            .with_detail(e.to_string())
    })?;
    Ok(())
}

/// Ensures the output directory exists and is writable.
///
/// Writability is verified with a create+delete sentinel probe rather than
/// trusting directory metadata.
pub async fn validate_output_dir(dir: &Path) -> Result<(), CompressionError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        CompressionError::validation(format!(
            "output directory '{}' could not be created",
            dir.display()
        ))
        .with_detail(e.to_string())
    })?;

    let sentinel = dir.join(format!(".vidpress-probe-{}", Uuid::new_v4()));
    tokio::fs::write(&sentinel, b"").await.map_err(|e| {
        CompressionError::validation(format!(
            "output directory '{}' is not writable",
            dir.display()
        ))
        .with_detail(e.to_string())
    })?;
    let _ = tokio::fs::remove_file(&sentinel).await;

    Ok(())
}
