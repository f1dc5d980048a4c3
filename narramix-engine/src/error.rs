//! Error types for narramix-engine
//!
//! Engine failures are typed with thiserror; the controller boundary converts
//! them into [`Outcome`] values so callers never see a panic or a raw error.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for narramix-engine
#[derive(Error, Debug)]
pub enum Error {
    /// A primary or background input is not selected or does not exist
    #[error("{0}")]
    SourceMissing(String),

    /// Duration could not be determined
    #[error("{0}")]
    ProbeFailed(String),

    /// The transcoding engine could not be started
    #[error("Failed to start FFmpeg: {0}")]
    EngineSpawnFailed(String),

    /// The transcoding engine exited unsuccessfully
    #[error("FFmpeg failed: {summary}")]
    EngineNonZeroExit {
        code: Option<i32>,
        summary: String,
    },

    /// The engine reported success but produced no output file
    #[error("Output file was not created: {}", .0.display())]
    OutputMissing(PathBuf),

    /// Output exists but holds less data than required
    #[error("Output too small: {bytes} bytes (need at least {minimum})")]
    OutputTooSmall { bytes: u64, minimum: u64 },

    /// The playback device rejected the buffered file
    #[error("Player failed to load audio: {0}")]
    PlayerLoadFailed(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioDevice(String),

    /// Operation was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared helpers
    #[error(transparent)]
    Common(#[from] narramix_common::Error),
}

/// Convenience Result type using narramix-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Result of a controller operation as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        Outcome::failure(err.to_string())
    }
}

impl From<Result<String>> for Outcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Outcome::ok(message),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_error_keeps_message() {
        let outcome: Outcome = Error::OutputTooSmall {
            bytes: 10,
            minimum: 100,
        }
        .into();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Output too small: 10 bytes (need at least 100)");
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome: Outcome = Ok::<_, Error>("Playback stopped".to_string()).into();
        assert_eq!(outcome, Outcome::ok("Playback stopped"));

        let outcome: Outcome = Err::<String, _>(Error::Cancelled).into();
        assert_eq!(outcome, Outcome::failure("Cancelled"));
    }
}
