//! Audio output using cpal
//!
//! **Threads:**
//! - `narramix-audio` owns the cpal stream for the device's lifetime (cpal
//!   streams are not `Send`)
//! - `narramix-feeder` (one per loaded file) tails the growing WAV and pushes
//!   samples into a lock-free ring buffer read by the stream callback
//!
//! The file is 22050 Hz mono; when the device cannot run at that rate each
//! source sample is held for the matching number of device frames.

use super::wav::{PcmTail, PLAYBACK_SAMPLE_RATE};
use super::AudioOutputDevice;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Ring capacity in source samples (2 s of audio)
const RING_CAPACITY: usize = PLAYBACK_SAMPLE_RATE as usize * 2;

/// Samples moved per feeder iteration
const FEED_CHUNK: usize = 4096;

/// Playback ends once the file has not grown for this long
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

const FEED_IDLE_SLEEP: Duration = Duration::from_millis(50);
const FEED_FULL_SLEEP: Duration = Duration::from_millis(10);

/// State shared between the control side, the feeder and the stream callback
struct Shared {
    volume_bits: AtomicU32,
    paused: AtomicBool,
    consumer: Mutex<Option<HeapCons<f32>>>,
}

impl Shared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

/// Feeder thread for the currently loaded file
struct Feeder {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

/// Default output device driven through cpal
pub struct CpalOutputDevice {
    shared: Arc<Shared>,
    feeder: Mutex<Option<Feeder>>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalOutputDevice {
    /// Open the default output device and start its (silent) stream
    pub fn open() -> Result<Self> {
        let shared = Arc::new(Shared {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            paused: AtomicBool::new(true),
            consumer: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stream_shared = Arc::clone(&shared);

        thread::Builder::new()
            .name("narramix-audio".to_string())
            .spawn(move || match open_stream(stream_shared) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    // Keep the stream alive until the device is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let rate = ready_rx
            .recv()
            .map_err(|_| Error::AudioDevice("Audio thread exited during startup".to_string()))??;
        info!(device_rate = rate, "Audio output ready");

        Ok(Self {
            shared,
            feeder: Mutex::new(None),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    fn stop_feeder(&self) {
        let feeder = self
            .feeder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(feeder) = feeder {
            feeder.stop.store(true, Ordering::SeqCst);
        }
    }

    fn install_consumer(&self, consumer: Option<HeapCons<f32>>) {
        *self
            .shared
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = consumer;
    }
}

impl AudioOutputDevice for CpalOutputDevice {
    fn load(&self, path: &Path) -> Result<()> {
        let (tail, header) = PcmTail::open(path)?;
        self.stop_feeder();
        self.shared.paused.store(true, Ordering::SeqCst);

        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        self.install_consumer(Some(consumer));

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let feeder_stop = Arc::clone(&stop);
        let feeder_finished = Arc::clone(&finished);

        thread::Builder::new()
            .name("narramix-feeder".to_string())
            .spawn(move || {
                feed(tail, producer, &feeder_stop);
                feeder_finished.store(true, Ordering::SeqCst);
            })?;

        *self.feeder.lock().unwrap_or_else(PoisonError::into_inner) = Some(Feeder { stop, finished });
        debug!(path = %path.display(), data_offset = header.data_offset, "Loaded stream buffer");
        Ok(())
    }

    fn play(&self) -> Result<()> {
        if self
            .feeder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(Error::InvalidState("Nothing loaded".to_string()));
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    fn unpause(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.stop_feeder();
        self.install_consumer(None);
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn is_busy(&self) -> bool {
        let feeding = self
            .feeder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|f| !f.finished.load(Ordering::SeqCst));
        match feeding {
            None => false,
            Some(true) => true,
            Some(false) => self
                .shared
                .consumer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|c| !c.is_empty()),
        }
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        self.stop_feeder();
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }
}

/// Tail the file into the ring until stopped or the file stalls
fn feed(mut tail: PcmTail, mut producer: HeapProd<f32>, stop: &AtomicBool) {
    let mut samples: Vec<i16> = Vec::with_capacity(FEED_CHUNK);
    let mut converted: Vec<f32> = Vec::with_capacity(FEED_CHUNK);
    let mut last_growth = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let vacant = producer.vacant_len();
        if vacant < FEED_CHUNK / 4 {
            // Consumer is behind (or paused); not a stall
            last_growth = Instant::now();
            thread::sleep(FEED_FULL_SLEEP);
            continue;
        }

        samples.clear();
        match tail.read_samples(&mut samples, vacant.min(FEED_CHUNK)) {
            Ok(0) => {
                if last_growth.elapsed() >= STALL_TIMEOUT {
                    debug!("Stream buffer stopped growing, feeder done");
                    break;
                }
                thread::sleep(FEED_IDLE_SLEEP);
            }
            Ok(_) => {
                last_growth = Instant::now();
                converted.clear();
                converted.extend(samples.iter().map(|s| f32::from(*s) / 32768.0));
                producer.push_slice(&converted);
            }
            Err(e) => {
                warn!("Stream buffer read failed: {}", e);
                break;
            }
        }
    }
}

fn open_stream(shared: Arc<Shared>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioDevice("No default output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (config, sample_format) = pick_config(&device)?;
    info!(
        "Using audio device: {} ({} Hz, {} ch, {:?})",
        name, config.sample_rate.0, config.channels, sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, shared)?,
        other => {
            return Err(Error::AudioDevice(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioDevice(format!("Failed to start stream: {}", e)))?;
    Ok((stream, config.sample_rate.0))
}

/// Prefer a config running at the file's rate; otherwise the device default
fn pick_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let native = device
        .supported_output_configs()
        .map_err(|e| Error::AudioDevice(format!("Failed to get device configs: {}", e)))?
        .find(|c| {
            c.min_sample_rate().0 <= PLAYBACK_SAMPLE_RATE
                && c.max_sample_rate().0 >= PLAYBACK_SAMPLE_RATE
                && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
        });

    if let Some(supported) = native {
        let sample_format = supported.sample_format();
        let config = supported
            .with_sample_rate(cpal::SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        return Ok((config, sample_format));
    }

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioDevice(format!("Failed to get default config: {}", e)))?;
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, shared: Arc<Shared>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let step = f64::from(PLAYBACK_SAMPLE_RATE) / f64::from(config.sample_rate.0);
    let mut phase = 1.0f64;
    let mut held = 0.0f32;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let paused = shared.paused.load(Ordering::Relaxed);
                let volume = shared.volume();
                // Never block the audio thread; a contended lock plays silence
                let mut guard = shared.consumer.try_lock().ok();
                let mut source = guard.as_mut().and_then(|g| g.as_mut());

                for frame in data.chunks_mut(channels) {
                    let sample = match (paused, source.as_mut()) {
                        (false, Some(consumer)) => {
                            phase += step;
                            while phase >= 1.0 {
                                held = consumer.try_pop().unwrap_or(0.0);
                                phase -= 1.0;
                            }
                            held
                        }
                        _ => 0.0,
                    };
                    let value = T::from_sample((sample * volume).clamp(-1.0, 1.0));
                    frame.fill(value);
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| Error::AudioDevice(format!("Failed to build stream: {}", e)))
}
