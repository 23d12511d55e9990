//! Compression task model and batch expansion.
//!
//! A batch is the cross product of input files and preset configurations.
//! Each task is identified by a structured `TaskKey` (file path + preset id)
//! used consistently across every map in the system; there is no secondary
//! string key format.

use crate::presets::PresetRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for one (file, preset) compression unit within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub file: PathBuf,
    pub preset_id: String,
}

impl TaskKey {
    pub fn new(file: impl Into<PathBuf>, preset_id: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            preset_id: preset_id.into(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.file.display(), self.preset_id)
    }
}

/// Lifecycle status of a compression task.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Compressing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Compressing => write!(f, "compressing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One compression unit: a single input file against a single preset config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionTask {
    pub key: TaskKey,
    /// Input file basename, used for display and events.
    pub file_name: String,
    pub preset_id: String,
    pub status: TaskStatus,
    /// Display progress percentage in [0, 100].
    pub progress: f32,
    pub keep_audio: bool,
    /// Resolved output path (collision-safe within the batch).
    pub output_path: PathBuf,
    /// Unix timestamp in milliseconds when the task entered `Compressing`.
    pub started_at_unix_ms: Option<i64>,
    pub error: Option<String>,
}

impl CompressionTask {
    pub fn new(key: TaskKey, keep_audio: bool, output_path: PathBuf) -> Self {
        let file_name = key
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.file.display().to_string());
        let preset_id = key.preset_id.clone();
        Self {
            key,
            file_name,
            preset_id,
            status: TaskStatus::Pending,
            progress: 0.0,
            keep_audio,
            output_path,
            started_at_unix_ms: None,
            error: None,
        }
    }
}

/// Current unix time in milliseconds.
pub(crate) fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One (preset, audio) configuration requested for every file in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub preset_id: String,
    pub keep_audio: bool,
}

impl PresetConfig {
    pub fn new(preset_id: impl Into<String>, keep_audio: bool) -> Self {
        Self {
            preset_id: preset_id.into(),
            keep_audio,
        }
    }
}

/// Container extension for a video codec.
///
/// Codecs the mp4 muxer cannot carry are mapped to a WebM container.
pub fn container_for_codec(codec: &str) -> &'static str {
    let lower = codec.to_ascii_lowercase();
    if lower.contains("vp8") || lower.contains("vp9") || lower.contains("vpx") {
        "webm"
    } else {
        "mp4"
    }
}

/// Expands (files x preset configs) into the batch's task list.
///
/// Unknown preset ids are skipped with a warning rather than failing the
/// batch. Output names are `<stem>_<preset-id>.<ext>` unless the caller
/// supplied a custom name for the file; repeated output names within the
/// batch get a stable occurrence-counter suffix so duplicate input basenames
/// never collide.
pub fn expand_tasks(
    files: &[PathBuf],
    configs: &[PresetConfig],
    output_dir: &Path,
    output_names: &HashMap<PathBuf, String>,
    registry: &PresetRegistry,
) -> Vec<CompressionTask> {
    let mut tasks = Vec::new();
    let mut seen_keys: HashSet<TaskKey> = HashSet::new();
    let mut name_occurrences: HashMap<String, usize> = HashMap::new();

    for file in files {
        for config in configs {
            let preset = match registry.get(&config.preset_id) {
                Some(preset) => preset,
                None => {
                    tracing::warn!(
                        "skipping unknown preset '{}' for '{}'",
                        config.preset_id,
                        file.display()
                    );
                    continue;
                }
            };

            let key = TaskKey::new(file.clone(), config.preset_id.clone());
            if !seen_keys.insert(key.clone()) {
                tracing::warn!("skipping duplicate task {}", key);
                continue;
            }

            let ext = container_for_codec(&preset.settings.video_codec);
            let base = match output_names.get(file) {
                Some(custom) => Path::new(custom)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| custom.clone()),
                None => {
                    let stem = file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "output".to_string());
                    format!("{}_{}", stem, config.preset_id)
                }
            };

            let occurrence = name_occurrences
                .entry(format!("{}.{}", base, ext))
                .and_modify(|n| *n += 1)
                .or_insert(1);
            let file_name = if *occurrence == 1 {
                format!("{}.{}", base, ext)
            } else {
                format!("{}_{}.{}", base, occurrence, ext)
            };

            tasks.push(CompressionTask::new(
                key,
                config.keep_audio,
                output_dir.join(file_name),
            ));
        }
    }

    tasks
}
