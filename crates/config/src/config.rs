//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Concurrency-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent compressions (0 = auto-derive from core count)
    #[serde(default)]
    pub max_concurrent: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_concurrent: 0 }
    }
}

/// Thermal monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermalSection {
    /// Whether thermal monitoring is enabled (default false)
    #[serde(default)]
    pub enabled: bool,
    /// Sampling interval in seconds (default 15)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Cooldown window in seconds after a throttling recommendation (default 10)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_sample_interval_secs() -> u64 {
    15
}

fn default_cooldown_secs() -> u64 {
    10
}

impl Default for ThermalSection {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_interval_secs: default_sample_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Default output directory for compressed files
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub thermal: ThermalSection,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDPRESS_MAX_CONCURRENT -> concurrency.max_concurrent
    /// - VIDPRESS_THERMAL_ENABLED -> thermal.enabled
    /// - VIDPRESS_THERMAL_INTERVAL_SECS -> thermal.sample_interval_secs
    /// - VIDPRESS_THERMAL_COOLDOWN_SECS -> thermal.cooldown_secs
    /// - VIDPRESS_OUTPUT_DIR -> output.directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDPRESS_MAX_CONCURRENT") {
            if let Ok(limit) = val.parse::<u32>() {
                self.concurrency.max_concurrent = limit;
            }
        }

        if let Ok(val) = env::var("VIDPRESS_THERMAL_ENABLED") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.thermal.enabled = true,
                "false" | "0" | "no" => self.thermal.enabled = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("VIDPRESS_THERMAL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.thermal.sample_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("VIDPRESS_THERMAL_COOLDOWN_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.thermal.cooldown_secs = secs;
            }
        }

        if let Ok(val) = env::var("VIDPRESS_OUTPUT_DIR") {
            if !val.is_empty() {
                self.output.directory = Some(PathBuf::from(val));
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
