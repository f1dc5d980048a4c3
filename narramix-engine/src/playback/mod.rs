//! Playback coordination
//!
//! The [`PlaybackController`] owns play/pause/position/volume state, replaces
//! stream sessions when the user seeks or changes speed, and hosts the render
//! and preview entry points.

pub mod clock;
pub mod controller;
pub mod events;
pub mod state;

pub use clock::PositionClock;
pub use controller::PlaybackController;
pub use events::MixEvent;
pub use state::PlaybackState;
