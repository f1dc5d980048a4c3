//! Stream sessions
//!
//! Supervises one engine run writing a growing WAV into a private temporary
//! file, and hands that file to the playback device once enough of it exists.
//!
//! **Phases:** `Starting → Buffering → Ready → {Streaming, Failed, Stopped}`
//!
//! The temporary output lives as long as the session; it is deleted on
//! [`StreamSession::stop`] and, failing that, when the session is dropped.

use super::process::EngineProcess;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::mix::{
    write_concat_list, EngineInvocation, FilterGraphBuilder, MixSettings, MixSource,
    OutputProfile, PrimaryInput,
};
use crate::player::AudioOutputDevice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded wait for the first playable chunk of output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Wait before the first size check
    pub initial_delay: Duration,
    pub max_attempts: u32,
    /// Back-off while the output is still empty
    pub empty_backoff: Duration,
    /// Back-off while the output is growing but below `min_bytes`
    pub growing_backoff: Duration,
    pub min_bytes: u64,
}

impl BufferPolicy {
    /// Policy for full playback
    pub fn full_playback() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 20,
            empty_backoff: Duration::from_millis(300),
            growing_backoff: Duration::from_millis(500),
            min_bytes: 200_000,
        }
    }

    /// Policy for short previews
    pub fn preview() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 15,
            empty_backoff: Duration::from_millis(300),
            growing_backoff: Duration::from_millis(400),
            min_bytes: 100_000,
        }
    }
}

/// Reports how much output the engine has written so far
pub trait OutputSizeOracle: Send + Sync {
    /// Current size in bytes, `None` while the output does not exist
    fn output_size(&self) -> Option<u64>;
}

/// Oracle reading the size of a file on disk
#[derive(Debug, Clone)]
pub struct FileSizeOracle {
    path: PathBuf,
}

impl FileSizeOracle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSizeOracle for FileSizeOracle {
    fn output_size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// How a buffering wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    Ready { bytes: u64 },
    /// The engine exited before enough output existed
    EngineExited,
    /// Attempts ran out; `bytes` is the last observed size
    Exhausted { bytes: u64 },
    Cancelled,
}

/// Poll `oracle` under `policy` until the output is playable
///
/// `engine_exited` is checked on every attempt after the size; output that
/// already reached the threshold wins over an exit.
pub async fn await_buffered<F>(
    policy: &BufferPolicy,
    oracle: &dyn OutputSizeOracle,
    mut engine_exited: F,
    cancel: &CancellationToken,
) -> BufferOutcome
where
    F: FnMut() -> bool,
{
    if !sleep_or_cancel(policy.initial_delay, cancel).await {
        return BufferOutcome::Cancelled;
    }

    let mut bytes = 0;
    for attempt in 1..=policy.max_attempts {
        bytes = oracle.output_size().unwrap_or(0);
        if bytes >= policy.min_bytes {
            debug!(attempt, bytes, "Output buffered");
            return BufferOutcome::Ready { bytes };
        }
        if engine_exited() {
            return BufferOutcome::EngineExited;
        }

        let backoff = if bytes > 0 {
            policy.growing_backoff
        } else {
            policy.empty_backoff
        };
        if !sleep_or_cancel(backoff, cancel).await {
            return BufferOutcome::Cancelled;
        }
    }

    BufferOutcome::Exhausted { bytes }
}

/// `false` when cancelled before `delay` elapsed
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPhase {
    Starting,
    Buffering,
    Ready,
    Streaming,
    Failed,
    Stopped,
}

/// What to stream
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub primary: MixSource,
    pub background: PathBuf,
    pub settings: MixSettings,
    /// Start offset in the primary source timeline
    pub source_start: f64,
    /// Output length cap
    pub output_duration: f64,
    /// Previews use the preview buffer policy and trim multi-file input
    pub preview: bool,
}

/// One streaming engine run
pub struct StreamSession {
    id: Uuid,
    config: Arc<EngineConfig>,
    player: Arc<dyn AudioOutputDevice>,
    policy: BufferPolicy,
    phase: StreamPhase,
    process: Option<EngineProcess>,
    output: Option<TempPath>,
    concat: Option<TempPath>,
}

impl StreamSession {
    /// Build the command and spawn the engine; does not wait for output
    pub fn start(
        config: Arc<EngineConfig>,
        player: Arc<dyn AudioOutputDevice>,
        request: &StreamRequest,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let multi_file = request.primary.is_multi_file();

        let concat = if multi_file {
            Some(write_concat_list(request.primary.paths())?)
        } else {
            None
        };
        let primary = match &concat {
            Some(list) => PrimaryInput::ConcatList(list.to_path_buf()),
            None => PrimaryInput::File(request.primary.paths()[0].clone()),
        };

        let trim_span = request
            .preview
            .then(|| request.output_duration * request.settings.speed());
        let graph = FilterGraphBuilder::new(&request.settings)
            .multi_file(multi_file)
            .seek(request.source_start)
            .preview(trim_span)
            .build();

        let output = tempfile::Builder::new()
            .prefix("narramix-stream-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        let invocation = EngineInvocation {
            primary,
            background: request.background.clone(),
            graph,
            duration_cap: Some(request.output_duration),
            profile: OutputProfile::Playback,
            output: output.to_path_buf(),
        };

        let process = EngineProcess::spawn(&config.ffmpeg_path, &invocation)?;
        let policy = if request.preview {
            config.preview_buffer
        } else {
            config.playback_buffer
        };

        info!(
            session_id = %id,
            pid = ?process.pid(),
            start = request.source_start,
            duration = request.output_duration,
            preview = request.preview,
            "Stream started"
        );

        Ok(Self {
            id,
            config,
            player,
            policy,
            phase: StreamPhase::Buffering,
            process: Some(process),
            output: Some(output),
            concat,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Temporary output file, while the session holds one
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Wait for playable output, then start the device at `volume`
    ///
    /// On error the phase is `Failed` (or `Stopped` when cancelled); the
    /// caller still owns cleanup through [`StreamSession::stop`].
    pub async fn wait_until_ready(&mut self, cancel: &CancellationToken, volume: f32) -> Result<()> {
        let result = self.buffer_and_play(cancel, volume).await;
        if let Err(e) = &result {
            self.phase = match e {
                Error::Cancelled => StreamPhase::Stopped,
                _ => StreamPhase::Failed,
            };
            warn!(session_id = %self.id, "Stream not started: {}", e);
        }
        result
    }

    async fn buffer_and_play(&mut self, cancel: &CancellationToken, volume: f32) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| Error::InvalidState("Stream has no output file".to_string()))?;
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Stream engine already stopped".to_string()))?;

        let oracle = FileSizeOracle::new(&output);
        let outcome = await_buffered(
            &self.policy,
            &oracle,
            || !matches!(process.try_exit(), Ok(None)),
            cancel,
        )
        .await;

        match outcome {
            BufferOutcome::Ready { bytes } => {
                debug!(session_id = %self.id, bytes, "Stream buffered");
            }
            BufferOutcome::Cancelled => return Err(Error::Cancelled),
            BufferOutcome::Exhausted { bytes } => {
                return Err(Error::OutputTooSmall {
                    bytes,
                    minimum: self.policy.min_bytes,
                });
            }
            BufferOutcome::EngineExited => {
                process.flush_diagnostics().await;
                let code = process.try_exit().ok().flatten().and_then(|s| s.code());
                debug!(session_id = %self.id, "Engine output:\n{}", process.diagnostics().text());
                return Err(Error::EngineNonZeroExit {
                    code,
                    summary: process.diagnostics().tail(),
                });
            }
        }
        self.phase = StreamPhase::Ready;

        self.player.load(&output)?;
        self.player.set_volume(volume);
        self.player.play()?;

        // The engine has the playlist open by now
        self.concat = None;
        self.phase = StreamPhase::Streaming;
        info!(session_id = %self.id, "Streaming");
        Ok(())
    }

    /// Stop engine and device, then delete the temporary output
    pub async fn stop(&mut self) {
        if self.phase == StreamPhase::Stopped && self.process.is_none() {
            return;
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.terminate(self.config.terminate_grace).await {
                warn!(session_id = %self.id, "Failed to stop engine: {}", e);
            }
        }
        if matches!(self.phase, StreamPhase::Ready | StreamPhase::Streaming) {
            self.player.stop();
        }

        // Let the device release the file before it disappears
        tokio::time::sleep(self.config.stop_settle).await;

        if let Some(output) = self.output.take() {
            let path = output.to_path_buf();
            if let Err(e) = output.close() {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove stream buffer {}: {}", path.display(), e);
                }
            }
        }
        self.concat = None;
        self.phase = StreamPhase::Stopped;
        debug!(session_id = %self.id, "Stream stopped");
    }
}
