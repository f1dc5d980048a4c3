//! Render progress estimation
//!
//! Maps encoded-seconds observations onto the 20-95% band of a render,
//! throttles callback frequency and derives an ETA once enough work is done.

use narramix_common::human_time::format_remaining;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Percent reported when encoding starts
pub const ENCODING_FLOOR: u8 = 20;

/// Highest percent reported before the output is verified
pub const ENCODING_CEILING: u8 = 95;

/// Minimum wall time between two progress callbacks
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(300);

/// Completed fraction below which no ETA is offered
const ETA_MIN_RATIO: f64 = 0.01;

/// One progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    pub percent: u8,
    pub message: String,
    /// Encoded output seconds, when known
    pub current_seconds: Option<f64>,
    pub eta_seconds: Option<f64>,
}

impl RenderProgress {
    /// Fixed-stage report (preparation and completion)
    pub fn stage(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent,
            message: message.into(),
            current_seconds: None,
            eta_seconds: None,
        }
    }
}

/// Progress state for one render
#[derive(Debug)]
pub struct ProgressModel {
    target_seconds: f64,
    started: Instant,
    throttle: Duration,
    last_emit: Option<Instant>,
    last_percent: u8,
}

impl ProgressModel {
    /// `target_seconds` is the expected output duration
    pub fn new(target_seconds: f64, started: Instant) -> Self {
        Self {
            target_seconds,
            started,
            throttle: DEFAULT_THROTTLE,
            last_emit: None,
            last_percent: ENCODING_FLOOR,
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Highest percent reported so far
    pub fn percent(&self) -> u8 {
        self.last_percent
    }

    /// Feed one encoded-seconds observation
    ///
    /// Returns a report unless the observation is unusable or arrives inside
    /// the throttle window.
    pub fn observe(&mut self, current_seconds: f64, now: Instant) -> Option<RenderProgress> {
        if current_seconds <= 0.0 || self.target_seconds <= 0.0 {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.throttle {
                return None;
            }
        }

        let ratio = (current_seconds / self.target_seconds).min(1.0);
        let computed = (f64::from(ENCODING_FLOOR) + (75.0 * ratio).round())
            .min(f64::from(ENCODING_CEILING)) as u8;
        let percent = computed.max(self.last_percent);

        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = if elapsed > 0.0 { current_seconds / elapsed } else { 0.0 };
        let eta_seconds = (ratio > ETA_MIN_RATIO).then(|| elapsed * (1.0 / ratio - 1.0));

        let eta_text = match eta_seconds {
            Some(eta) => format!("ETA: {}", format_remaining(eta)),
            None => "Calculating ETA...".to_string(),
        };
        let message = format!(
            "{}% • {:.1}/{:.1} min • {:.2}x speed • {}",
            percent,
            current_seconds / 60.0,
            self.target_seconds / 60.0,
            speed,
            eta_text,
        );

        self.last_emit = Some(now);
        self.last_percent = percent;

        Some(RenderProgress {
            percent,
            message,
            current_seconds: Some(current_seconds),
            eta_seconds,
        })
    }
}
