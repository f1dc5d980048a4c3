//! Playback device interface
//!
//! The controller talks to audio output only through [`AudioOutputDevice`].
//! One device is created at startup and shared by `Arc`; sessions load a
//! growing WAV into it and drive play/pause/volume.

mod cpal_device;
pub mod wav;

pub use cpal_device::CpalOutputDevice;
pub use wav::{PcmTail, WavHeader, PLAYBACK_BITS, PLAYBACK_CHANNELS, PLAYBACK_SAMPLE_RATE};

use crate::error::Result;
use std::path::Path;

/// Audio output used for streamed playback
///
/// Implementations must accept a file that is still being written and keep
/// reading until it stops growing.
pub trait AudioOutputDevice: Send + Sync {
    /// Open `path` for playback; fails on an unsupported WAV format
    fn load(&self, path: &Path) -> Result<()>;

    /// Start the loaded file
    fn play(&self) -> Result<()>;

    fn pause(&self);

    fn unpause(&self);

    /// Stop and release the loaded file
    fn stop(&self);

    /// Output volume, 0.0-1.0
    fn set_volume(&self, volume: f32);

    /// True while the loaded file still has audio to play
    fn is_busy(&self) -> bool;
}
