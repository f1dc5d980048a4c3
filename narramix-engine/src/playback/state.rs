//! Playback state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing has played yet
    Idle,
    /// A stream session is buffering
    Preparing,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    /// States in which a stream session exists (or is being created)
    pub fn has_session(self) -> bool {
        matches!(
            self,
            PlaybackState::Preparing | PlaybackState::Playing | PlaybackState::Paused
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Preparing => "preparing",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
