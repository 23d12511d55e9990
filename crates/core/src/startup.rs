//! Startup checks for the transcoder binaries.
//!
//! Verifies ffmpeg and ffprobe respond before the first batch runs, so a
//! missing installation surfaces as one clear error instead of a failed task.

use thiserror::Error;
use tokio::process::Command;

/// Error types for startup checks.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),
}

/// Extracts the version string from `ffmpeg -version` output.
///
/// Returns `None` when the output does not look like ffmpeg's banner.
pub fn parse_ffmpeg_version(output: &str) -> Option<String> {
    let first_line = output.lines().next()?;
    let rest = first_line.strip_prefix("ffmpeg version ")?;
    rest.split_whitespace().next().map(|v| v.to_string())
}

/// Checks that ffmpeg runs and returns its version string.
pub async fn check_ffmpeg_available() -> Result<String, StartupError> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| StartupError::FfmpegUnavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "ffmpeg -version exited with {:?}",
            output.status.code()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffmpeg_version(&stdout)
        .ok_or_else(|| StartupError::FfmpegUnavailable("unrecognized version banner".to_string()))
}

/// Checks that ffprobe runs.
pub async fn check_ffprobe_available() -> Result<(), StartupError> {
    let output = Command::new("ffprobe")
        .arg("-version")
        .output()
        .await
        .map_err(|e| StartupError::FfprobeUnavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(StartupError::FfprobeUnavailable(format!(
            "ffprobe -version exited with {:?}",
            output.status.code()
        )));
    }
    Ok(())
}

/// Runs all startup checks and returns the ffmpeg version.
pub async fn run_startup_checks() -> Result<String, StartupError> {
    let version = check_ffmpeg_available().await?;
    check_ffprobe_available().await?;
    Ok(version)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_from_banner() {
        let banner = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers\nbuilt with gcc 13";
        assert_eq!(parse_ffmpeg_version(banner), Some("6.1.1-3ubuntu5".to_string()));
    }

    #[test]
    fn test_parse_version_plain() {
        assert_eq!(
            parse_ffmpeg_version("ffmpeg version 7.0 Copyright"),
            Some("7.0".to_string())
        );
    }

    #[test]
    fn test_parse_version_rejects_other_output() {
        assert_eq!(parse_ffmpeg_version("bash: ffmpeg: command not found"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }
}
