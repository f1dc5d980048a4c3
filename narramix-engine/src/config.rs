//! narramix-engine runtime configuration
//!
//! Built from the bootstrap [`TomlConfig`]; holds resolved engine paths,
//! supervision timings and the buffering policies used by stream sessions.

use crate::session::BufferPolicy;
use narramix_common::config::TomlConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum size of a finished render (bytes)
pub const MIN_RENDER_BYTES: u64 = 100_000;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub probe_timeout: Duration,
    /// Grace period between the terminate request and a forced kill
    pub terminate_grace: Duration,
    /// Quiet window before a speed change restarts streaming
    pub speed_debounce: Duration,
    /// Pause between stopping a stream and deleting its temp file
    pub stop_settle: Duration,
    pub playback_buffer: BufferPolicy,
    pub preview_buffer: BufferPolicy,
    pub min_render_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl From<&TomlConfig> for EngineConfig {
    fn from(toml: &TomlConfig) -> Self {
        Self {
            ffmpeg_path: toml.ffmpeg_path.clone(),
            ffprobe_path: toml.ffprobe_path.clone(),
            probe_timeout: Duration::from_secs(toml.tuning.probe_timeout_secs),
            terminate_grace: Duration::from_millis(toml.tuning.terminate_grace_ms),
            speed_debounce: Duration::from_millis(toml.tuning.speed_debounce_ms),
            stop_settle: Duration::from_millis(100),
            playback_buffer: BufferPolicy::full_playback(),
            preview_buffer: BufferPolicy::preview(),
            min_render_bytes: MIN_RENDER_BYTES,
        }
    }
}
