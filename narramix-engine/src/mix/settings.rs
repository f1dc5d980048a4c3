//! Mix settings and source selection

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Slowest supported primary speed
pub const MIN_SPEED: f64 = 0.5;

/// Fastest supported primary speed
pub const MAX_SPEED: f64 = 2.0;

/// Share of the device volume driven by the primary track
const PRIMARY_VOLUME_WEIGHT: f64 = 0.7;

/// Share of the device volume driven by the background track
const BACKGROUND_VOLUME_WEIGHT: f64 = 0.3;

/// Extension accepted when discovering a folder of primary files
const FOLDER_EXTENSION: &str = "mp3";

/// Convert a gain in decibels to a linear amplitude factor
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// User-adjustable mix parameters
///
/// Speed is always held inside `[MIN_SPEED, MAX_SPEED]`; out-of-range values
/// are clamped rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixSettings {
    speed: f64,
    pub primary_gain_db: f64,
    pub background_gain_db: f64,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            speed: 1.0,
            primary_gain_db: 0.0,
            background_gain_db: -10.0,
        }
    }
}

impl MixSettings {
    pub fn new(speed: f64, primary_gain_db: f64, background_gain_db: f64) -> Self {
        Self {
            speed: clamp_speed(speed),
            primary_gain_db,
            background_gain_db,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.set_speed(speed);
        self
    }

    /// Single device volume approximating both track gains (0.0-1.0)
    ///
    /// Used for live adjustments while a stream is already encoded with the
    /// gains it was started with.
    pub fn blended_volume(&self) -> f32 {
        let combined = PRIMARY_VOLUME_WEIGHT * db_to_linear(self.primary_gain_db)
            + BACKGROUND_VOLUME_WEIGHT * db_to_linear(self.background_gain_db);
        combined.clamp(0.0, 1.0) as f32
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Primary track selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "paths", rename_all = "snake_case")]
pub enum MixSource {
    /// One file, seekable directly by the engine
    File(PathBuf),
    /// Ordered files concatenated through a playlist
    Sequence(Vec<PathBuf>),
}

impl MixSource {
    /// Discover the audio files directly inside `dir`, sorted by path
    pub fn from_folder(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::SourceMissing(format!(
                "Folder not found: {}",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(FOLDER_EXTENSION))
            })
            .collect();

        if files.is_empty() {
            return Err(Error::SourceMissing(format!(
                "No MP3 files found in {}",
                dir.display()
            )));
        }

        files.sort();
        debug!(count = files.len(), dir = %dir.display(), "Discovered primary files");
        Ok(MixSource::Sequence(files))
    }

    /// Build from an explicit file list; one file is treated as a single source
    pub fn from_paths(mut paths: Vec<PathBuf>) -> Result<Self> {
        match paths.len() {
            0 => Err(Error::SourceMissing("No audiobook files selected".to_string())),
            1 => Ok(MixSource::File(paths.remove(0))),
            _ => Ok(MixSource::Sequence(paths)),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        match self {
            MixSource::File(path) => std::slice::from_ref(path),
            MixSource::Sequence(paths) => paths,
        }
    }

    /// Sequences always go through the concat demuxer, even with one entry
    pub fn is_multi_file(&self) -> bool {
        matches!(self, MixSource::Sequence(_))
    }

    /// Check the selection is non-empty and every file exists
    pub fn ensure_available(&self) -> Result<()> {
        let paths = self.paths();
        if paths.is_empty() {
            return Err(Error::SourceMissing("No audiobook files selected".to_string()));
        }
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(Error::SourceMissing(format!(
                "Audiobook file not found: {}",
                missing.display()
            )));
        }
        Ok(())
    }

    /// Short label for logs and status lines
    pub fn describe(&self) -> String {
        match self {
            MixSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            MixSource::Sequence(paths) => format!("{} files", paths.len()),
        }
    }
}
