//! Persisted user settings
//!
//! Plain values the front-end restores between runs. Every field carries a
//! serde default so a file written by an older build merges cleanly with
//! settings added later.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Settings written to `settings.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    /// Reopen the last primary/background selection on startup
    pub auto_reload_files: bool,

    /// Last single-file primary track
    pub last_primary_path: Option<PathBuf>,

    /// Last multi-file primary selection, in playback order
    pub last_primary_files: Vec<PathBuf>,

    /// Last background track
    pub last_background_path: Option<PathBuf>,

    /// Directory the primary picker last browsed
    pub last_primary_dir: Option<PathBuf>,

    /// Directory the background picker last browsed
    pub last_background_dir: Option<PathBuf>,

    /// Primary track speed factor
    pub speed: f64,

    /// Primary track gain (dB)
    pub primary_gain_db: f64,

    /// Background track gain (dB)
    pub background_gain_db: f64,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        let home = dirs::home_dir();
        Self {
            auto_reload_files: true,
            last_primary_path: None,
            last_primary_files: Vec::new(),
            last_background_path: None,
            last_primary_dir: home.clone(),
            last_background_dir: home,
            speed: 1.0,
            primary_gain_db: 0.0,
            background_gain_db: -10.0,
        }
    }
}

impl PersistedSettings {
    /// Forget the remembered file selection (keeps levels and speed)
    pub fn clear_file_paths(&mut self) {
        self.last_primary_path = None;
        self.last_primary_files.clear();
        self.last_background_path = None;
    }
}

/// Reads and writes [`PersistedSettings`] as pretty JSON
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.narramix/settings.json`
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".narramix").join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing or corrupt file yields the defaults
    pub fn load(&self) -> PersistedSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => PersistedSettings::default(),
            Err(e) => {
                warn!("Could not load settings from {}: {}", self.path.display(), e);
                PersistedSettings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<PersistedSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write settings, creating the parent directory when needed
    pub fn save(&self, settings: &PersistedSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}
