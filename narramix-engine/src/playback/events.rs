//! Controller events
//!
//! Broadcast to any number of subscribers; a lagging or absent subscriber
//! never blocks the controller.

use super::state::PlaybackState;
use crate::session::RenderProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by the playback controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MixEvent {
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Position set without playback (seek while idle or stopped)
    PositionCued {
        position: f64,
        timestamp: DateTime<Utc>,
    },

    /// A speed change will restart streaming once the debounce window passes
    SpeedRestartScheduled {
        speed: f64,
        timestamp: DateTime<Utc>,
    },

    RenderProgress(RenderProgress),

    RenderFinished {
        success: bool,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl MixEvent {
    pub fn state_changed(old_state: PlaybackState, new_state: PlaybackState) -> Self {
        MixEvent::PlaybackStateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        }
    }

    pub fn position_cued(position: f64) -> Self {
        MixEvent::PositionCued {
            position,
            timestamp: Utc::now(),
        }
    }

    pub fn speed_restart_scheduled(speed: f64) -> Self {
        MixEvent::SpeedRestartScheduled {
            speed,
            timestamp: Utc::now(),
        }
    }

    pub fn render_finished(success: bool, message: impl Into<String>) -> Self {
        MixEvent::RenderFinished {
            success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
