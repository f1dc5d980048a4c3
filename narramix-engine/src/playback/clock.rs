//! Position clock
//!
//! Position is `anchor + (now - started_at)` while running and `anchor`
//! otherwise. Positions are seconds in the mixed output timeline.

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionClock {
    anchor: f64,
    started_at: Option<Instant>,
}

impl Default for PositionClock {
    fn default() -> Self {
        Self::stopped_at(0.0)
    }
}

impl PositionClock {
    pub fn stopped_at(position: f64) -> Self {
        Self {
            anchor: position,
            started_at: None,
        }
    }

    /// Hold at `position` without running
    pub fn set(&mut self, position: f64) {
        self.anchor = position.max(0.0);
        self.started_at = None;
    }

    /// Start running from `position` at `now`
    pub fn run_from(&mut self, position: f64, now: Instant) {
        self.anchor = position.max(0.0);
        self.started_at = Some(now);
    }

    /// Stop running, keeping the position reached at `now`
    pub fn freeze(&mut self, now: Instant) {
        self.anchor = self.position(now);
        self.started_at = None;
    }

    /// Continue running from the frozen position
    pub fn resume(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn position(&self, now: Instant) -> f64 {
        match self.started_at {
            Some(started) => self.anchor + now.saturating_duration_since(started).as_secs_f64(),
            None => self.anchor,
        }
    }
}
