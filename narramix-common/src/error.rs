//! Common error types for narramix

use thiserror::Error;

/// Common result type for narramix helpers
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared by the narramix crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file could not be encoded or decoded
    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),
}
