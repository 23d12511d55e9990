//! Error taxonomy and failure classification for compression tasks.
//!
//! Raw subprocess and validation failures are mapped into a small set of
//! error kinds with a fixed recoverability flag and suggested remediation.
//! Classification is keyword-based with first-match-wins precedence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Category of a compression failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input file, output directory, preset, or overrides.
    Validation,
    /// The transcoder subprocess reported a failure.
    Transcoder,
    /// Disk, memory, or permission problem outside the transcoder.
    System,
    /// User-initiated cancellation; not an error from the user's perspective.
    Cancellation,
    /// Hardware acceleration unavailable.
    Hardware,
    /// Anything that could not be classified.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Transcoder => write!(f, "transcoder"),
            ErrorKind::System => write!(f, "system"),
            ErrorKind::Cancellation => write!(f, "cancellation"),
            ErrorKind::Hardware => write!(f, "hardware"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified compression failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CompressionError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
    pub recoverable: bool,
    pub suggested_action: Option<String>,
}

impl CompressionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
            detail: None,
            recoverable: false,
            suggested_action: None,
        }
    }

    pub fn transcoder(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transcoder,
            message: message.into(),
            detail: None,
            recoverable: false,
            suggested_action: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::System,
            message: message.into(),
            detail: None,
            recoverable: false,
            suggested_action: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
            detail: None,
            recoverable: false,
            suggested_action: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancellation,
            message: "compression was cancelled".to_string(),
            detail: None,
            recoverable: true,
            suggested_action: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancellation
    }
}

/// Context for classifying a raw failure.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub file_name: &'a str,
    pub preset_id: &'a str,
    pub codec: &'a str,
}

/// Keywords indicating hardware acceleration is unavailable.
const HARDWARE_KEYWORDS: &[&str] = &[
    "nvenc", "cuda", "qsv", "vaapi", "videotoolbox", "amf", "hwaccel",
    "hardware acceleration",
];

/// Keywords indicating the requested encoder is missing or mismatched.
const ENCODER_KEYWORDS: &[&str] = &[
    "unknown encoder", "encoder not found", "incorrect codec parameters",
    "codec not currently supported",
];

/// Keywords indicating the input file is missing.
const MISSING_INPUT_KEYWORDS: &[&str] = &[
    "no such file", "does not exist", "could not open file",
];

/// Keywords indicating a permission problem.
const PERMISSION_KEYWORDS: &[&str] = &[
    "permission denied", "operation not permitted", "access is denied",
];

/// Keywords indicating the disk is full.
const DISK_SPACE_KEYWORDS: &[&str] = &[
    "no space left", "disk full", "not enough space",
];

/// Keywords indicating an unsupported container or corrupt stream.
const FORMAT_KEYWORDS: &[&str] = &[
    "invalid data found", "unknown format", "unsupported codec",
    "moov atom not found", "invalid argument",
];

const MAX_DETAIL_CHARS: usize = 400;

fn contains_any_keyword(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| haystack.contains(kw))
}

fn truncate_detail(raw: &str) -> String {
    raw.trim().chars().take(MAX_DETAIL_CHARS).collect()
}

/// Classifies a raw failure message into a `CompressionError`.
///
/// Precedence (first match wins): hardware acceleration unavailable,
/// encoder mismatch, missing input file, permission denied, insufficient
/// disk space, unsupported container/format, generic transcoder failure.
pub fn classify_failure(raw: &str, ctx: &FailureContext<'_>) -> CompressionError {
    let lower = raw.to_lowercase();

    if contains_any_keyword(&lower, HARDWARE_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::Hardware,
            message: format!("hardware acceleration unavailable for '{}'", ctx.file_name),
            detail: Some(truncate_detail(raw)),
            recoverable: true,
            suggested_action: Some(format!(
                "retry with a software encoder instead of '{}'",
                ctx.codec
            )),
        };
    }

    if contains_any_keyword(&lower, ENCODER_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::Transcoder,
            message: format!(
                "encoder '{}' requested by preset '{}' is not available",
                ctx.codec, ctx.preset_id
            ),
            detail: Some(truncate_detail(raw)),
            recoverable: false,
            suggested_action: Some(
                "install a transcoder build that includes this encoder or pick another preset"
                    .to_string(),
            ),
        };
    }

    if contains_any_keyword(&lower, MISSING_INPUT_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::Validation,
            message: format!("input file '{}' is missing", ctx.file_name),
            detail: Some(truncate_detail(raw)),
            recoverable: false,
            suggested_action: Some("verify the file still exists and is readable".to_string()),
        };
    }

    if contains_any_keyword(&lower, PERMISSION_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::System,
            message: format!("permission denied while processing '{}'", ctx.file_name),
            detail: Some(truncate_detail(raw)),
            recoverable: false,
            suggested_action: Some(
                "check permissions on the input file and output directory".to_string(),
            ),
        };
    }

    if contains_any_keyword(&lower, DISK_SPACE_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::System,
            message: "insufficient disk space for compressed output".to_string(),
            detail: Some(truncate_detail(raw)),
            recoverable: true,
            suggested_action: Some("free up disk space and retry".to_string()),
        };
    }

    if contains_any_keyword(&lower, FORMAT_KEYWORDS) {
        return CompressionError {
            kind: ErrorKind::Transcoder,
            message: format!("'{}' is not a supported container or is corrupt", ctx.file_name),
            detail: Some(truncate_detail(raw)),
            recoverable: false,
            suggested_action: Some(
                "remux the input into a standard container and retry".to_string(),
            ),
        };
    }

    CompressionError {
        kind: ErrorKind::Transcoder,
        message: format!(
            "transcoder failed for '{}' with preset '{}'",
            ctx.file_name, ctx.preset_id
        ),
        detail: Some(truncate_detail(raw)),
        recoverable: false,
        suggested_action: Some("inspect the transcoder output for details".to_string()),
    }
}

/// Aggregate view over many task failures in one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub recoverable: usize,
    pub non_recoverable: usize,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub suggestions: Vec<String>,
}

impl ErrorSummary {
    /// Rolls up a batch's errors into counts and a de-duplicated suggestion list.
    pub fn from_errors<'a>(errors: impl IntoIterator<Item = &'a CompressionError>) -> Self {
        let mut summary = Self {
            total: 0,
            recoverable: 0,
            non_recoverable: 0,
            by_kind: BTreeMap::new(),
            suggestions: Vec::new(),
        };

        for error in errors {
            summary.total += 1;
            if error.recoverable {
                summary.recoverable += 1;
            } else {
                summary.non_recoverable += 1;
            }
            *summary.by_kind.entry(error.kind).or_insert(0) += 1;
            if let Some(suggestion) = &error.suggested_action {
                if !summary.suggestions.iter().any(|s| s == suggestion) {
                    summary.suggestions.push(suggestion.clone());
                }
            }
        }

        summary
    }
}
