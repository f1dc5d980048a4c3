//! Duration probing
//!
//! Asks the probe engine for a file's length from container metadata without
//! decoding it. Individual probe failures are values (`None`), not errors; the
//! aggregate over a source decides whether a missing duration is fatal.

use crate::error::{Error, Result};
use crate::mix::MixSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Message used when no duration could be obtained for a source
pub const DURATION_UNAVAILABLE: &str = "Could not determine audiobook duration";

/// Source of media durations
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Length of `path` in seconds, or `None` when unavailable
    async fn probe(&self, path: &Path) -> Option<f64>;
}

/// Probe backed by `ffprobe -show_format` JSON output
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    program: PathBuf,
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, path: &Path) -> Option<f64> {
        if !path.is_file() {
            debug!(path = %path.display(), "Probe skipped, file does not exist");
            return None;
        }

        let output = Command::new(&self.program)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run {}: {}", self.program.display(), e);
                return None;
            }
            Err(_) => {
                warn!(path = %path.display(), "Duration probe timed out after {:?}", self.timeout);
                return None;
            }
        };

        if !output.status.success() {
            debug!(path = %path.display(), status = %output.status, "Duration probe failed");
            return None;
        }

        let duration = parse_probe_duration(&output.stdout);
        if duration.is_none() {
            debug!(path = %path.display(), "Probe output carried no usable duration");
        }
        duration
    }
}

/// Extract `format.duration` from probe JSON
///
/// The probe engine reports durations as strings; plain numbers are accepted
/// too.
pub fn parse_probe_duration(json: &[u8]) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_slice(json).ok()?;
    let duration = &value["format"]["duration"];
    let seconds = match duration {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}

/// Total primary duration in seconds (source timeline)
///
/// Sequence entries whose probe fails count as zero; the call only fails when
/// every entry is unavailable.
pub async fn aggregate_duration(probe: &dyn DurationProbe, source: &MixSource) -> Result<f64> {
    let mut total = 0.0;
    let mut known = 0usize;

    for path in source.paths() {
        match probe.probe(path).await {
            Some(seconds) => {
                total += seconds;
                known += 1;
            }
            None => warn!(path = %path.display(), "Duration unavailable, counting as 0"),
        }
    }

    if known == 0 {
        return Err(Error::ProbeFailed(DURATION_UNAVAILABLE.to_string()));
    }
    Ok(total)
}
