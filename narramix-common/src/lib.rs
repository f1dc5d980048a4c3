//! # narramix Common Library
//!
//! Shared code for the narramix workspace:
//! - Error type used by the shared helpers
//! - Bootstrap configuration loading (TOML) and config file resolution
//! - Persisted user settings round-trip
//! - Human-readable time formatting for positions and ETAs

pub mod config;
pub mod error;
pub mod human_time;
pub mod settings;

pub use error::{Error, Result};
pub use settings::PersistedSettings;
