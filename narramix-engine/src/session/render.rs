//! Render sessions
//!
//! Supervises one engine run writing a finished mix to a target file.
//!
//! **Phases:** `Starting → Encoding → {Succeeded, Failed, Cancelled}`
//!
//! Progress in the 0-20% band is reported as fixed preparation stages; the
//! 20-95% band follows the engine's `time=` markers; 100% is reported once the
//! output has been verified.

use super::diagnostics::parse_progress_time;
use super::process::EngineProcess;
use super::progress::{ProgressModel, RenderProgress};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::mix::{
    write_concat_list, EngineInvocation, FilterGraphBuilder, MixSettings, MixSource,
    OutputProfile, PrimaryInput,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sample rate of rendered files
pub const RENDER_SAMPLE_RATE: u32 = 44100;

/// Lifecycle of a render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderPhase {
    Starting,
    Encoding,
    Succeeded,
    Failed,
    Cancelled,
}

/// What to render
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub primary: MixSource,
    pub background: PathBuf,
    pub settings: MixSettings,
    pub target: PathBuf,
    /// Primary duration in the source timeline
    pub primary_duration: f64,
}

impl RenderRequest {
    /// Length of the finished mix
    pub fn output_duration(&self) -> f64 {
        self.primary_duration / self.settings.speed()
    }
}

/// Result of a successful render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub output: PathBuf,
    pub bytes: u64,
    pub duration_seconds: f64,
}

/// One render run
pub struct RenderSession {
    id: Uuid,
    config: EngineConfig,
    request: RenderRequest,
    phase: RenderPhase,
}

impl RenderSession {
    pub fn new(config: EngineConfig, request: RenderRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            request,
            phase: RenderPhase::Starting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    /// Run the render to completion
    ///
    /// `progress` is called from this task; `cancel` stops the engine and
    /// removes the partial output.
    pub async fn run<F>(&mut self, mut progress: F, cancel: CancellationToken) -> Result<RenderReport>
    where
        F: FnMut(RenderProgress) + Send,
    {
        let result = self.run_inner(&mut progress, &cancel).await;
        self.phase = match &result {
            Ok(_) => RenderPhase::Succeeded,
            Err(Error::Cancelled) => RenderPhase::Cancelled,
            Err(_) => RenderPhase::Failed,
        };
        result
    }

    async fn run_inner<F>(&mut self, progress: &mut F, cancel: &CancellationToken) -> Result<RenderReport>
    where
        F: FnMut(RenderProgress) + Send,
    {
        let request = &self.request;
        request.primary.ensure_available()?;
        if !request.background.is_file() {
            return Err(Error::SourceMissing(format!(
                "Background music file not found: {}",
                request.background.display()
            )));
        }

        progress(RenderProgress::stage(10, "Preparing render..."));

        let multi_file = request.primary.is_multi_file();
        // Held until this function returns, whatever the outcome
        let concat = if multi_file {
            let count = request.primary.paths().len();
            progress(RenderProgress::stage(15, format!("Preparing to merge {} files...", count)));
            Some(write_concat_list(request.primary.paths())?)
        } else {
            None
        };

        let primary = match &concat {
            Some(list) => PrimaryInput::ConcatList(list.to_path_buf()),
            None => PrimaryInput::File(request.primary.paths()[0].clone()),
        };

        let graph = FilterGraphBuilder::new(&request.settings)
            .multi_file(multi_file)
            .resample(RENDER_SAMPLE_RATE)
            .build();
        let target_seconds = request.output_duration();

        let invocation = EngineInvocation {
            primary,
            background: request.background.clone(),
            graph,
            duration_cap: Some(target_seconds),
            profile: OutputProfile::Render,
            output: request.target.clone(),
        };

        progress(RenderProgress::stage(20, "Starting render..."));

        let mut process = EngineProcess::spawn(&self.config.ffmpeg_path, &invocation)?;
        self.phase = RenderPhase::Encoding;
        info!(
            session_id = %self.id,
            pid = ?process.pid(),
            target = %request.target.display(),
            "Render started ({:.1} min of output)",
            target_seconds / 60.0
        );

        let mut lines = process.take_lines();
        let mut model = ProgressModel::new(target_seconds, Instant::now());

        let status = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(session_id = %self.id, "Render cancelled, stopping engine");
                    process.terminate(self.config.terminate_grace).await?;
                    remove_partial(&request.target);
                    return Err(Error::Cancelled);
                }

                status = process.wait() => break status?,

                line = recv_line(&mut lines) => match line {
                    Some(line) => self.observe_line(&line, &mut model, progress),
                    None => lines = None,
                },
            }
        };

        process.flush_diagnostics().await;
        // Markers written just before exit may still be queued
        if let Some(mut rx) = lines {
            while let Ok(line) = rx.try_recv() {
                self.observe_line(&line, &mut model, progress);
            }
        }
        drop(concat);

        if !status.success() {
            let diagnostics = process.diagnostics();
            debug!(session_id = %self.id, "Engine output:\n{}", diagnostics.text());
            let summary = diagnostics.summary();
            error!(session_id = %self.id, status = %status, "Render failed: {}", summary);
            return Err(Error::EngineNonZeroExit {
                code: status.code(),
                summary,
            });
        }

        let bytes = match tokio::fs::metadata(&request.target).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(Error::OutputMissing(request.target.clone())),
        };
        if bytes < self.config.min_render_bytes {
            warn!(session_id = %self.id, bytes, "Render output suspiciously small");
            return Err(Error::OutputTooSmall {
                bytes,
                minimum: self.config.min_render_bytes,
            });
        }

        progress(RenderProgress::stage(100, "Render complete"));
        info!(session_id = %self.id, bytes, "Render finished");

        Ok(RenderReport {
            output: request.target.clone(),
            bytes,
            duration_seconds: target_seconds,
        })
    }
}

impl RenderSession {
    fn observe_line<F>(&self, line: &str, model: &mut ProgressModel, progress: &mut F)
    where
        F: FnMut(RenderProgress) + Send,
    {
        if let Some(current) = parse_progress_time(line) {
            if let Some(report) = model.observe(current, Instant::now()) {
                debug!(session_id = %self.id, percent = report.percent, "Render progress");
                progress(report);
            }
        }
    }
}

/// Next diagnostic line; pends forever once the stream is closed
async fn recv_line(lines: &mut Option<tokio::sync::mpsc::Receiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn remove_partial(target: &Path) {
    match std::fs::remove_file(target) {
        Ok(()) => debug!(target = %target.display(), "Removed partial render"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial render {}: {}", target.display(), e),
    }
}
