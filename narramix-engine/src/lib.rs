//! # narramix Engine (narramix-engine)
//!
//! Mixes a long-form narrated recording with a looping background track by
//! driving an external transcoding engine, and supervises the resulting
//! subprocesses for export, preview and streamed playback.
//!
//! **Architecture:** leaves first
//! - `mix`: filter-graph, concat list and engine argument construction
//! - `probe`: duration queries against the probe engine
//! - `session`: subprocess supervision for renders and streamed playback
//! - `player`: audio output device interface and the cpal implementation
//! - `playback`: the controller owning play/pause/position/volume state

pub mod config;
pub mod error;
pub mod mix;
pub mod playback;
pub mod player;
pub mod probe;
pub mod scheduler;
pub mod session;

pub use config::EngineConfig;
pub use error::{Error, Outcome, Result};
pub use mix::{MixSettings, MixSource};
pub use playback::{MixEvent, PlaybackController, PlaybackState};
