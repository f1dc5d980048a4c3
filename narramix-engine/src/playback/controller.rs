//! Playback controller
//!
//! **Responsibilities:**
//! - Own play/pause/position/volume state and the single active stream session
//! - Replace the session on play, seek and (debounced) speed changes
//! - Host the preview and render entry points
//! - Convert every failure into an [`Outcome`] for the caller
//!
//! **Concurrency:** operations that replace the session are serialised by an
//! async lock around the session slot. Status reads use a separate short-lived
//! lock and never wait for a session to start. `stop()` cancels any in-flight
//! preparation before taking the session lock so it never waits out a
//! buffering loop.

use super::clock::PositionClock;
use super::events::MixEvent;
use super::state::PlaybackState;
use crate::config::EngineConfig;
use crate::error::{Error, Outcome, Result};
use crate::mix::{MixSettings, MixSource};
use crate::player::AudioOutputDevice;
use crate::probe::{aggregate_duration, DurationProbe};
use crate::scheduler::CoalescingScheduler;
use crate::session::{RenderProgress, RenderRequest, RenderSession, StreamRequest, StreamSession};
use narramix_common::human_time::format_clock;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SOURCES_NOT_LOADED: &str = "Please load both audiobook and background music first.";

/// Events buffered per subscriber
const EVENT_CAPACITY: usize = 100;

/// Snapshot state guarded by a short-lived lock
struct Status {
    state: PlaybackState,
    clock: PositionClock,
    settings: MixSettings,
    primary: Option<MixSource>,
    background: Option<PathBuf>,
    /// Speed the current stream was encoded with
    stream_speed: Option<f64>,
}

struct Inner {
    config: Arc<EngineConfig>,
    player: Arc<dyn AudioOutputDevice>,
    probe: Arc<dyn DurationProbe>,
    session: tokio::sync::Mutex<Option<StreamSession>>,
    status: Mutex<Status>,
    /// Cancels the preparation currently holding (or waiting for) the session slot
    preempt: Mutex<CancellationToken>,
    render_cancel: Mutex<Option<CancellationToken>>,
    speed_restart: CoalescingScheduler,
    events: broadcast::Sender<MixEvent>,
}

/// Shared handle to the playback controller
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

/// Clears the render slot when the render ends or its future is dropped
struct RenderSlot<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for RenderSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaybackController {
    pub fn new(
        config: EngineConfig,
        player: Arc<dyn AudioOutputDevice>,
        probe: Arc<dyn DurationProbe>,
        settings: MixSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let speed_restart = CoalescingScheduler::new(config.speed_debounce);

        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                player,
                probe,
                session: tokio::sync::Mutex::new(None),
                status: Mutex::new(Status {
                    state: PlaybackState::Idle,
                    clock: PositionClock::default(),
                    settings,
                    primary: None,
                    background: None,
                    stream_speed: None,
                }),
                preempt: Mutex::new(CancellationToken::new()),
                render_cancel: Mutex::new(None),
                speed_restart,
                events,
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.inner.status)
    }

    fn emit(&self, event: MixEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn set_state(&self, status: &mut Status, new_state: PlaybackState) {
        let old_state = status.state;
        if old_state != new_state {
            status.state = new_state;
            debug!("Playback state: {} -> {}", old_state, new_state);
            self.emit(MixEvent::state_changed(old_state, new_state));
        }
    }

    /// Cancel whatever preparation is in flight and issue a fresh token
    fn preempt_previous(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.inner.preempt), token.clone());
        previous.cancel();
        token
    }

    // ----- queries -----

    pub fn state(&self) -> PlaybackState {
        self.status().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// True once the device has played out the active stream
    pub fn output_finished(&self) -> bool {
        self.is_playing() && !self.inner.player.is_busy()
    }

    /// Position in the mixed output timeline (seconds)
    pub fn current_position(&self) -> f64 {
        self.status().clock.position(Instant::now())
    }

    pub fn settings(&self) -> MixSettings {
        self.status().settings
    }

    pub fn primary(&self) -> Option<MixSource> {
        self.status().primary.clone()
    }

    pub fn background(&self) -> Option<PathBuf> {
        self.status().background.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MixEvent> {
        self.inner.events.subscribe()
    }

    /// Length of the mix at the current speed
    pub async fn mixed_duration(&self) -> Result<f64> {
        let (primary, speed) = {
            let status = self.status();
            (status.primary.clone(), status.settings.speed())
        };
        let primary =
            primary.ok_or_else(|| Error::SourceMissing("No audiobook loaded".to_string()))?;
        Ok(aggregate_duration(self.inner.probe.as_ref(), &primary).await? / speed)
    }

    // ----- sources -----

    pub async fn set_primary(&self, source: MixSource) -> Outcome {
        if let Err(e) = source.ensure_available() {
            return e.into();
        }
        if self.state().has_session() {
            self.stop().await;
        }

        let label = source.describe();
        {
            let mut status = self.status();
            status.primary = Some(source);
            status.clock.set(0.0);
        }
        info!("Audiobook loaded: {}", label);
        Outcome::ok(format!("Loaded audiobook: {}", label))
    }

    pub async fn set_background(&self, path: impl Into<PathBuf>) -> Outcome {
        let path = path.into();
        if !path.is_file() {
            return Outcome::failure(format!("Background music file not found: {}", path.display()));
        }
        if self.state().has_session() {
            self.stop().await;
        }

        let label = file_label(&path);
        self.status().background = Some(path);
        info!("Background music loaded: {}", label);
        Outcome::ok(format!("Loaded background music: {}", label))
    }

    // ----- transport -----

    /// Start streaming from `from`, or from the cued position
    pub async fn play(&self, from: Option<f64>) -> Outcome {
        self.start_stream(from, None).await.into()
    }

    /// Stream `duration` seconds starting at `from`
    pub async fn preview(&self, from: f64, duration: f64) -> Outcome {
        if !duration.is_finite() || duration <= 0.0 {
            return Outcome::failure("Preview duration must be positive");
        }
        self.start_stream(Some(from), Some(duration)).await.into()
    }

    async fn start_stream(&self, from: Option<f64>, preview: Option<f64>) -> Result<String> {
        let token = self.preempt_previous();
        self.inner.speed_restart.cancel();

        let mut slot = tokio::select! {
            guard = self.inner.session.lock() => guard,
            _ = token.cancelled() => return Err(Error::Cancelled),
        };

        let result = self.replace_session(&mut slot, &token, from, preview).await;
        if let Err(e) = &result {
            let mut status = self.status();
            status.stream_speed = None;
            if status.state.has_session() {
                self.set_state(&mut status, PlaybackState::Stopped);
            }
            match e {
                Error::Cancelled => debug!("Playback start cancelled"),
                e => warn!("Playback failed to start: {}", e),
            }
        }
        drop(slot);
        result
    }

    async fn replace_session(
        &self,
        slot: &mut Option<StreamSession>,
        token: &CancellationToken,
        from: Option<f64>,
        preview: Option<f64>,
    ) -> Result<String> {
        let cued = self.current_position();
        if let Some(mut previous) = slot.take() {
            previous.stop().await;
        }

        let (primary, background, settings) = {
            let status = self.status();
            (status.primary.clone(), status.background.clone(), status.settings)
        };
        let (Some(primary), Some(background)) = (primary, background) else {
            return Err(Error::SourceMissing(SOURCES_NOT_LOADED.to_string()));
        };
        primary.ensure_available()?;
        if !background.is_file() {
            return Err(Error::SourceMissing(format!(
                "Background music file not found: {}",
                background.display()
            )));
        }

        let start = from.unwrap_or(cued).max(0.0);
        {
            let mut status = self.status();
            status.clock.set(start);
            self.set_state(&mut status, PlaybackState::Preparing);
        }

        let source_duration = tokio::select! {
            duration = aggregate_duration(self.inner.probe.as_ref(), &primary) => duration?,
            _ = token.cancelled() => return Err(Error::Cancelled),
        };
        let speed = settings.speed();
        let mixed = source_duration / speed;
        if start >= mixed {
            return Err(Error::InvalidState(format!(
                "Position {} is past the end of the mix ({})",
                format_clock(start),
                format_clock(mixed)
            )));
        }

        let remaining = mixed - start;
        let output_duration = preview.map_or(remaining, |d| d.min(remaining));
        let request = StreamRequest {
            primary,
            background,
            settings,
            source_start: start * speed,
            output_duration,
            preview: preview.is_some(),
        };

        let mut session = StreamSession::start(
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.player),
            &request,
        )?;
        if let Err(e) = session.wait_until_ready(token, settings.blended_volume()).await {
            session.stop().await;
            return Err(e);
        }

        // Adjustments made while preparing were not encoded into this stream
        let live = {
            let mut status = self.status();
            status.stream_speed = Some(speed);
            status.clock.run_from(start, Instant::now());
            self.set_state(&mut status, PlaybackState::Playing);
            status.settings
        };
        if live.blended_volume() != settings.blended_volume() {
            debug!(volume = live.blended_volume(), "Gain changed while preparing");
            self.inner.player.set_volume(live.blended_volume());
        }
        if (live.speed() - speed).abs() > f64::EPSILON {
            debug!("Speed changed while preparing, {:.2}x -> {:.2}x", speed, live.speed());
            self.schedule_speed_restart(live.speed());
        }
        info!(
            session_id = %session.id(),
            start,
            speed,
            "Playback started ({} of {})",
            format_clock(start),
            format_clock(mixed)
        );
        *slot = Some(session);

        Ok(match preview {
            Some(_) => format!(
                "Previewing {:.0}s from {}",
                output_duration,
                format_clock(start)
            ),
            None => format!("Playing from {}", format_clock(start)),
        })
    }

    pub fn pause(&self) -> Outcome {
        let mut status = self.status();
        if status.state != PlaybackState::Playing {
            return Outcome::failure("Nothing is playing");
        }

        self.inner.player.pause();
        let now = Instant::now();
        status.clock.freeze(now);
        self.set_state(&mut status, PlaybackState::Paused);
        Outcome::ok(format!("Paused at {}", format_clock(status.clock.position(now))))
    }

    /// Continue a paused stream; restarts it if the speed changed meanwhile
    pub async fn resume(&self) -> Outcome {
        let restart_from = {
            let mut status = self.status();
            if status.state != PlaybackState::Paused {
                return Outcome::failure("Playback is not paused");
            }

            let now = Instant::now();
            let speed = status.settings.speed();
            match status.stream_speed {
                Some(stream_speed) if (stream_speed - speed).abs() > f64::EPSILON => {
                    Some(status.clock.position(now) * stream_speed / speed)
                }
                _ => {
                    self.inner.player.unpause();
                    status.clock.resume(now);
                    self.set_state(&mut status, PlaybackState::Playing);
                    None
                }
            }
        };

        match restart_from {
            Some(position) => {
                debug!("Speed changed while paused, restarting at {:.1}s", position);
                self.play(Some(position)).await
            }
            None => Outcome::ok(format!("Resumed at {}", format_clock(self.current_position()))),
        }
    }

    pub async fn stop(&self) -> Outcome {
        lock(&self.inner.preempt).cancel();
        self.inner.speed_restart.cancel();

        let mut slot = self.inner.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.stop().await;
        }

        let mut status = self.status();
        status.clock.set(0.0);
        status.stream_speed = None;
        if status.state != PlaybackState::Idle {
            self.set_state(&mut status, PlaybackState::Stopped);
        }
        drop(status);
        drop(slot);

        info!("Playback stopped");
        Outcome::ok("Playback stopped")
    }

    /// Jump to `to`; restarts the stream when one is active, else only cues
    pub async fn seek(&self, to: f64) -> Outcome {
        if !to.is_finite() {
            return Outcome::failure("Invalid seek position");
        }
        let to = to.max(0.0);

        if self.state().has_session() {
            return self.play(Some(to)).await;
        }

        self.status().clock.set(to);
        self.emit(MixEvent::position_cued(to));
        Outcome::ok(format!("Position set to {}", format_clock(to)))
    }

    // ----- mix adjustments -----

    /// Change speed; a playing stream restarts once changes settle
    pub fn set_speed(&self, speed: f64) -> Outcome {
        let (state, speed) = {
            let mut status = self.status();
            status.settings.set_speed(speed);
            (status.state, status.settings.speed())
        };

        // While preparing, the new stream picks the change up once it plays
        if state == PlaybackState::Playing {
            self.schedule_speed_restart(speed);
        }
        Outcome::ok(format!("Speed set to {:.2}x", speed))
    }

    fn schedule_speed_restart(&self, speed: f64) {
        self.emit(MixEvent::speed_restart_scheduled(speed));
        let controller = self.clone();
        self.inner
            .speed_restart
            .schedule(move || async move { controller.apply_speed_restart().await });
    }

    async fn apply_speed_restart(&self) {
        let (state, position, stream_speed, speed) = {
            let status = self.status();
            (
                status.state,
                status.clock.position(Instant::now()),
                status.stream_speed,
                status.settings.speed(),
            )
        };
        if state != PlaybackState::Playing {
            debug!("Speed restart skipped, playback is {}", state);
            return;
        }
        let Some(stream_speed) = stream_speed else {
            return;
        };
        if (stream_speed - speed).abs() <= f64::EPSILON {
            return;
        }

        let from = position * stream_speed / speed;
        info!("Restarting stream at {:.2}x from {:.1}s", speed, from);
        let outcome = self.play(Some(from)).await;
        if !outcome.success {
            warn!("Speed restart failed: {}", outcome.message);
        }
    }

    pub fn set_primary_gain(&self, db: f64) -> Outcome {
        if !db.is_finite() {
            return Outcome::failure("Invalid volume");
        }
        self.apply_gain(|settings| settings.primary_gain_db = db);
        Outcome::ok(format!("Audiobook volume {:+.1} dB", db))
    }

    pub fn set_background_gain(&self, db: f64) -> Outcome {
        if !db.is_finite() {
            return Outcome::failure("Invalid volume");
        }
        self.apply_gain(|settings| settings.background_gain_db = db);
        Outcome::ok(format!("Background volume {:+.1} dB", db))
    }

    fn apply_gain(&self, update: impl FnOnce(&mut MixSettings)) {
        let mut status = self.status();
        update(&mut status.settings);
        if matches!(status.state, PlaybackState::Playing | PlaybackState::Paused) {
            let volume = status.settings.blended_volume();
            debug!(volume, "Live volume update");
            self.inner.player.set_volume(volume);
        }
    }

    // ----- export -----

    /// Render the full mix to `target`; one render at a time
    pub async fn render<F>(&self, target: impl Into<PathBuf>, mut progress: F) -> Outcome
    where
        F: FnMut(RenderProgress) + Send,
    {
        let token = CancellationToken::new();
        {
            let mut slot = lock(&self.inner.render_cancel);
            if slot.is_some() {
                return Outcome::failure("A render is already in progress");
            }
            *slot = Some(token.clone());
        }
        let _slot = RenderSlot(&self.inner.render_cancel);

        let outcome: Outcome = self.run_render(target.into(), &mut progress, token).await.into();
        self.emit(MixEvent::render_finished(outcome.success, outcome.message.clone()));
        outcome
    }

    async fn run_render<F>(
        &self,
        target: PathBuf,
        progress: &mut F,
        token: CancellationToken,
    ) -> Result<String>
    where
        F: FnMut(RenderProgress) + Send,
    {
        let (primary, background, settings) = {
            let status = self.status();
            (status.primary.clone(), status.background.clone(), status.settings)
        };
        let (Some(primary), Some(background)) = (primary, background) else {
            return Err(Error::SourceMissing(SOURCES_NOT_LOADED.to_string()));
        };

        let primary_duration = aggregate_duration(self.inner.probe.as_ref(), &primary).await?;
        let request = RenderRequest {
            primary,
            background,
            settings,
            target,
            primary_duration,
        };

        let mut session = RenderSession::new(self.inner.config.as_ref().clone(), request);
        let events = self.inner.events.clone();
        let report = session
            .run(
                |report| {
                    let _ = events.send(MixEvent::RenderProgress(report.clone()));
                    progress(report);
                },
                token,
            )
            .await?;

        Ok(format!(
            "Export complete: {} ({:.1} MB)",
            report.output.display(),
            report.bytes as f64 / (1024.0 * 1024.0)
        ))
    }

    pub fn cancel_render(&self) -> Outcome {
        match lock(&self.inner.render_cancel).as_ref() {
            Some(token) => {
                token.cancel();
                Outcome::ok("Cancelling render...")
            }
            None => Outcome::failure("No render in progress"),
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
