//! Engine subprocess ownership
//!
//! **Responsibilities:**
//! - Spawn one engine run with stdin detached and stderr piped
//! - Drain stderr on a separate task so a full pipe never stalls the engine
//!   and exit detection never waits on output
//! - Split the diagnostic stream on both `\r` (stats updates) and `\n`
//! - Terminate gracefully, then forcibly after a grace period

use super::diagnostics::DiagnosticLog;
use crate::error::{Error, Result};
use crate::mix::EngineInvocation;
use futures::StreamExt;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, ChildStderr};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};

/// Longest diagnostic line kept before the reader falls back to draining
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Diagnostic lines buffered for a slow consumer; extras are dropped
const LINE_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the reader to flush after the engine exits
const READER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// A running engine subprocess
pub struct EngineProcess {
    child: Child,
    pid: Option<u32>,
    log: DiagnosticLog,
    lines: Option<mpsc::Receiver<String>>,
    reader: Option<JoinHandle<()>>,
}

impl EngineProcess {
    /// Spawn `invocation` with `program`
    pub fn spawn(program: &Path, invocation: &EngineInvocation) -> Result<Self> {
        debug!("Engine command: {} {}", program.display(), invocation.display_args());

        let mut child = invocation
            .command(program)
            .spawn()
            .map_err(|e| Error::EngineSpawnFailed(format!("{}: {}", program.display(), e)))?;

        let pid = child.id();
        let log = DiagnosticLog::new();
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

        let reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_diagnostics(stderr, log.clone(), tx)));

        info!(pid = ?pid, "Engine started");

        Ok(Self {
            child,
            pid,
            log,
            lines: Some(rx),
            reader,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the diagnostic line receiver (one consumer per process)
    pub fn take_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.lines.take()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Exit status if the engine has already finished
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the engine to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Wait until the diagnostic reader has consumed everything the engine wrote
    pub async fn flush_diagnostics(&mut self) {
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(READER_FLUSH_TIMEOUT, reader).await.is_err() {
                debug!(pid = ?self.pid, "Diagnostic reader still busy after exit");
            }
        }
    }

    /// Stop the engine: terminate request, then kill once `grace` elapses
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        self.request_terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                debug!(pid = ?self.pid, "Engine terminated");
                Ok(status?)
            }
            Err(_) => {
                warn!(pid = ?self.pid, "Engine ignored terminate request, killing");
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }

    #[cfg(unix)]
    fn request_terminate(&mut self) {
        match self.child.id() {
            Some(pid) => {
                // SAFETY: kill(2) has no memory-safety preconditions; pid is
                // our own unreaped child so it cannot have been recycled.
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc != 0 {
                    warn!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
                }
            }
            None => debug!("Engine already reaped"),
        }
    }

    #[cfg(not(unix))]
    fn request_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(pid = ?self.pid, "Failed to stop engine: {}", e);
        }
    }
}

async fn read_diagnostics(stderr: ChildStderr, log: DiagnosticLog, tx: mpsc::Sender<String>) {
    let codec = AnyDelimiterCodec::new_with_max_length(
        b"\r\n".to_vec(),
        b"\n".to_vec(),
        MAX_LINE_BYTES,
    );
    let mut frames = FramedRead::new(stderr, codec);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                log.push(line);
                let _ = tx.try_send(line.to_string());
            }
            Err(e) => {
                debug!("Diagnostic stream unreadable ({}), draining", e);
                let mut rest = frames.into_inner();
                let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
                return;
            }
        }
    }
}
