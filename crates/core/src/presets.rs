//! Preset registry for named compression configurations.
//!
//! Built-in presets cover the common web/social/archive targets; user-defined
//! presets are merged in at startup under a reserved `custom-` id prefix so
//! they can never collide with built-ins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Reserved id prefix for user-defined presets.
pub const CUSTOM_PRESET_PREFIX: &str = "custom-";

/// Error type for preset registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresetError {
    /// The id collides with a built-in preset.
    #[error("preset id '{0}' collides with a built-in preset")]
    BuiltinCollision(String),
}

/// Category of a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetCategory {
    Web,
    Social,
    Archive,
    Custom,
}

impl std::fmt::Display for PresetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetCategory::Web => write!(f, "web"),
            PresetCategory::Social => write!(f, "social"),
            PresetCategory::Archive => write!(f, "archive"),
            PresetCategory::Custom => write!(f, "custom"),
        }
    }
}

/// A target output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
        let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
        if width == 0 || height == 0 {
            return Err("resolution dimensions must be non-zero".to_string());
        }
        Ok(Self { width, height })
    }
}

/// Encoder settings carried by a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetSettings {
    /// Video encoder name (e.g. "libx264").
    pub video_codec: String,
    /// Target video bitrate, formatted as `<integer>k`.
    pub video_bitrate: String,
    /// Audio encoder name (e.g. "aac").
    pub audio_codec: String,
    /// Target audio bitrate, formatted as `<integer>k`.
    pub audio_bitrate: String,
    /// Output resolution (None keeps the source resolution).
    pub resolution: Option<Resolution>,
    /// Output frame rate (None keeps the source rate).
    pub fps: Option<u32>,
    /// Quality factor on the 0-51 scale; lower means higher quality.
    pub crf: u8,
    /// Encoder speed label (e.g. "medium", "slow").
    pub speed_preset: String,
}

/// A named compression configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub category: PresetCategory,
    pub settings: PresetSettings,
}

/// Registry of built-in and custom presets.
///
/// The registry is in-memory only; persisting the custom entries is the
/// caller's responsibility. `load` is expected to run once at startup.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: HashMap<String, Preset>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetRegistry {
    /// Creates a registry populated with the built-in presets.
    pub fn new() -> Self {
        let mut presets = HashMap::new();
        for (id, preset) in builtin_presets() {
            presets.insert(id.to_string(), preset);
        }
        Self { presets }
    }

    /// Looks up a preset by id.
    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(id)
    }

    /// Returns the full id -> preset mapping.
    pub fn get_all(&self) -> &HashMap<String, Preset> {
        &self.presets
    }

    /// Whether the id denotes a custom preset.
    pub fn is_custom(&self, id: &str) -> bool {
        id.starts_with(CUSTOM_PRESET_PREFIX)
    }

    /// Adds a custom preset, normalizing the id to the reserved prefix and
    /// forcing the category to `Custom`. Returns the normalized id.
    ///
    /// Ids that collide with a built-in (non-custom) preset are rejected.
    pub fn add(&mut self, id: &str, mut preset: Preset) -> Result<String, PresetError> {
        if self.presets.contains_key(id) && !self.is_custom(id) {
            return Err(PresetError::BuiltinCollision(id.to_string()));
        }

        let normalized = normalize_custom_id(id);
        preset.category = PresetCategory::Custom;
        self.presets.insert(normalized.clone(), preset);
        Ok(normalized)
    }

    /// Removes a custom preset. Removing a built-in id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.is_custom(id) {
            return false;
        }
        self.presets.remove(id).is_some()
    }

    /// Merges persisted custom presets into the registry.
    ///
    /// Called once by the composition root with the contents of the custom
    /// preset store (a flat JSON object keyed by custom-prefixed id). Ids are
    /// normalized and categories forced to `Custom` regardless of what was
    /// supplied.
    pub fn load(&mut self, initial: HashMap<String, Preset>) {
        for (id, preset) in initial {
            if let Err(e) = self.add(&id, preset) {
                tracing::warn!("skipping persisted custom preset: {}", e);
            }
        }
    }
}

/// Normalizes an id to carry the custom prefix exactly once.
fn normalize_custom_id(id: &str) -> String {
    if id.starts_with(CUSTOM_PRESET_PREFIX) {
        id.to_string()
    } else {
        format!("{}{}", CUSTOM_PRESET_PREFIX, id)
    }
}

fn builtin_presets() -> Vec<(&'static str, Preset)> {
    vec![
        (
            "web-standard",
            Preset {
                name: "Web Standard".to_string(),
                description: "1080p H.264 suitable for general web upload".to_string(),
                category: PresetCategory::Web,
                settings: PresetSettings {
                    video_codec: "libx264".to_string(),
                    video_bitrate: "2500k".to_string(),
                    audio_codec: "aac".to_string(),
                    audio_bitrate: "128k".to_string(),
                    resolution: Some(Resolution { width: 1920, height: 1080 }),
                    fps: Some(30),
                    crf: 23,
                    speed_preset: "medium".to_string(),
                },
            },
        ),
        (
            "web-high",
            Preset {
                name: "Web High Quality".to_string(),
                description: "Source-resolution H.264 with higher bitrate".to_string(),
                category: PresetCategory::Web,
                settings: PresetSettings {
                    video_codec: "libx264".to_string(),
                    video_bitrate: "5000k".to_string(),
                    audio_codec: "aac".to_string(),
                    audio_bitrate: "192k".to_string(),
                    resolution: None,
                    fps: None,
                    crf: 20,
                    speed_preset: "slow".to_string(),
                },
            },
        ),
        (
            "social-small",
            Preset {
                name: "Social Small".to_string(),
                description: "720p H.264 tuned for small uploads".to_string(),
                category: PresetCategory::Social,
                settings: PresetSettings {
                    video_codec: "libx264".to_string(),
                    video_bitrate: "1200k".to_string(),
                    audio_codec: "aac".to_string(),
                    audio_bitrate: "96k".to_string(),
                    resolution: Some(Resolution { width: 1280, height: 720 }),
                    fps: Some(30),
                    crf: 28,
                    speed_preset: "fast".to_string(),
                },
            },
        ),
        (
            "archive-hevc",
            Preset {
                name: "Archive HEVC".to_string(),
                description: "H.265 at source resolution for long-term storage".to_string(),
                category: PresetCategory::Archive,
                settings: PresetSettings {
                    video_codec: "libx265".to_string(),
                    video_bitrate: "3000k".to_string(),
                    audio_codec: "aac".to_string(),
                    audio_bitrate: "160k".to_string(),
                    resolution: None,
                    fps: None,
                    crf: 24,
                    speed_preset: "slow".to_string(),
                },
            },
        ),
        (
            "webm-vp9",
            Preset {
                name: "WebM VP9".to_string(),
                description: "VP9/Opus WebM for embedding".to_string(),
                category: PresetCategory::Web,
                settings: PresetSettings {
                    video_codec: "libvpx-vp9".to_string(),
                    video_bitrate: "1800k".to_string(),
                    audio_codec: "libopus".to_string(),
                    audio_bitrate: "128k".to_string(),
                    resolution: None,
                    fps: None,
                    crf: 32,
                    speed_preset: "good".to_string(),
                },
            },
        ),
    ]
}
