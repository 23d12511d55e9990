//! Media probing via ffprobe.
//!
//! Duration drives percent computation from the transcoder's progress
//! stream; stream presence gates validation before any encode starts.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute or returned non-zero.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    /// ffprobe could not be started.
    #[error("ffprobe could not be started: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Summary of a probed input file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds (0.0 when the container reports none).
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Probes an input file with ffprobe.
pub async fn probe_media(path: &Path) -> Result<MediaInfo, ProbeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProbeError::FfprobeFailed(stderr));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parses ffprobe's JSON output into a `MediaInfo`.
pub fn parse_probe_output(json: &str) -> Result<MediaInfo, ProbeError> {
    let parsed: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        duration_secs,
        has_video: video_stream.is_some(),
        has_audio,
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080
            },
            {
                "codec_type": "audio",
                "codec_name": "aac"
            }
        ],
        "format": {
            "duration": "90.500000"
        }
    }"#;

    #[test]
    fn test_parse_full_probe() {
        let info = parse_probe_output(SAMPLE_JSON).expect("sample should parse");
        assert!((info.duration_secs - 90.5).abs() < 1e-9);
        assert!(info.has_video);
        assert!(info.has_audio);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
    }

    #[test]
    fn test_parse_missing_duration_defaults_to_zero() {
        let json = r#"{"streams": [{"codec_type": "video", "codec_name": "h264"}], "format": {}}"#;
        let info = parse_probe_output(json).expect("should parse");
        assert_eq!(info.duration_secs, 0.0);
        assert!(info.has_video);
    }

    #[test]
    fn test_parse_audio_only_file() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}], "format": {"duration": "10.0"}}"#;
        let info = parse_probe_output(json).expect("should parse");
        assert!(!info.has_video);
        assert!(info.has_audio);
        assert_eq!(info.video_codec, None);
    }

    #[test]
    fn test_parse_invalid_json_is_rejected() {
        assert!(matches!(
            parse_probe_output("not json"),
            Err(ProbeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file_errors() {
        // Either ffprobe is absent (Io) or it reports the missing file.
        let result = probe_media(Path::new("/definitely/not/here.mp4")).await;
        assert!(result.is_err());
    }
}
