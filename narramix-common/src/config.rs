//! Bootstrap configuration loading and config file resolution
//!
//! The TOML file only carries bootstrap concerns: which engine binaries to
//! run, logging, and a handful of timing knobs. Everything the user adjusts
//! while mixing (speed, gains, last files) lives in [`crate::settings`].
//!
//! # Resolution order
//!
//! 1. Command-line argument (highest priority)
//! 2. `NARRAMIX_CONFIG` environment variable
//! 3. `<config dir>/narramix/config.toml`
//! 4. Compiled defaults
//!
//! A missing or unreadable file never stops startup; a warning is logged and
//! the compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "NARRAMIX_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Transcoding engine executable (name on PATH or absolute path)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Duration probe executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Timing knobs (optional)
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Timing knobs for subprocess supervision and debouncing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Upper bound for a single duration probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Grace period between the terminate request and a forced kill
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Quiet window before a speed change restarts streaming
    #[serde(default = "default_speed_debounce_ms")]
    pub speed_debounce_ms: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_terminate_grace_ms() -> u64 {
    2000
}

fn default_speed_debounce_ms() -> u64 {
    1000
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            logging: LoggingConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
            terminate_grace_ms: default_terminate_grace_ms(),
            speed_debounce_ms: default_speed_debounce_ms(),
        }
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Locates and loads the bootstrap config following the resolution order
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Path that would be read, if any candidate exists
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        default_config_path().filter(|p| p.exists())
    }

    /// Load the config, degrading to compiled defaults on any failure
    pub fn resolve(&self) -> TomlConfig {
        let Some(path) = self.locate() else {
            debug!("No config file found, using compiled defaults");
            return TomlConfig::default();
        };

        match TomlConfig::from_file(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "Loaded config file");
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                TomlConfig::default()
            }
        }
    }
}

/// Platform config file location (`~/.config/narramix/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("narramix").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

            [tuning]
            terminate_grace_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.tuning.terminate_grace_ms, 500);
        assert_eq!(config.tuning.probe_timeout_secs, 10);
        assert_eq!(config.tuning.speed_debounce_ms, 1000);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = TomlConfig::default();
        config.logging.level = "debug".to_string();
        let text = config.to_toml_string().unwrap();
        let parsed: TomlConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
