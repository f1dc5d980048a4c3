//! Shared fixtures for engine integration tests
//!
//! The transcoding and probe engines are replaced by small POSIX shell
//! scripts; the audio device by a recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use narramix_engine::player::AudioOutputDevice;
use narramix_engine::probe::DurationProbe;
use narramix_engine::session::BufferPolicy;
use narramix_engine::{EngineConfig, MixSettings, MixSource, PlaybackController};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Marker written after each run's arguments in the args log
const RUN_SEPARATOR: &str = "----";

/// Behaviour of the fake transcoding engine
#[derive(Debug, Clone)]
pub struct EngineScript {
    /// Bytes written to the output path (the last argument); 0 writes nothing
    pub bytes: u64,
    /// Lines written to stderr, each terminated by `\r`
    pub stderr: Vec<String>,
    pub exit_code: i32,
    /// Keep running this many seconds after writing output
    pub linger_secs: Option<u32>,
    /// Wait this long before writing output
    pub startup_delay_ms: Option<u32>,
}

impl EngineScript {
    pub fn succeeding(bytes: u64) -> Self {
        Self {
            bytes,
            stderr: Vec::new(),
            exit_code: 0,
            linger_secs: None,
            startup_delay_ms: None,
        }
    }

    pub fn failing(code: i32, stderr: &[&str]) -> Self {
        Self {
            bytes: 0,
            stderr: stderr.iter().map(|s| s.to_string()).collect(),
            exit_code: code,
            linger_secs: None,
            startup_delay_ms: None,
        }
    }

    /// Writes `bytes` then keeps running like a live stream
    pub fn streaming(bytes: u64) -> Self {
        Self {
            bytes,
            stderr: Vec::new(),
            exit_code: 0,
            linger_secs: Some(30),
            startup_delay_ms: None,
        }
    }

    /// Hold back output for `ms` so callers can act while the stream prepares
    pub fn after_delay(mut self, ms: u32) -> Self {
        self.startup_delay_ms = Some(ms);
        self
    }

    pub fn with_stderr(mut self, lines: &[&str]) -> Self {
        self.stderr = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    fn render(&self, args_log: &Path) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!(
            "{{ printf '%s\\n' \"$@\"; printf '%s\\n' '{}'; }} >> '{}'\n",
            RUN_SEPARATOR,
            args_log.display()
        ));
        script.push_str("for last; do :; done\n");
        for line in &self.stderr {
            script.push_str(&format!("printf '%s\\r' '{}' >&2\n", line));
        }
        if let Some(ms) = self.startup_delay_ms {
            script.push_str(&format!("sleep {}.{:03}\n", ms / 1000, ms % 1000));
        }
        if self.bytes > 0 {
            script.push_str(&format!(
                "dd if=/dev/zero of=\"$last\" bs={} count=1 2>/dev/null\n",
                self.bytes
            ));
        }
        if let Some(secs) = self.linger_secs {
            script.push_str(&format!("exec sleep {}\n", secs));
        }
        script.push_str(&format!("exit {}\n", self.exit_code));
        script
    }
}

/// Scratch directory holding fake engines, media fixtures and the args log
pub struct FakeTools {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
    pub args_log: PathBuf,
}

impl FakeTools {
    pub fn new(script: &EngineScript) -> Self {
        let dir = TempDir::new().unwrap();
        let args_log = dir.path().join("ffmpeg-args.log");
        let ffmpeg = write_script(dir.path(), "ffmpeg", &script.render(&args_log));
        Self {
            dir,
            ffmpeg,
            args_log,
        }
    }

    /// Fake probe engine answering `durations` by file name; others fail
    pub fn ffprobe(&self, durations: &[(&str, &str)]) -> PathBuf {
        let mut script = String::from("#!/bin/sh\nfor last; do :; done\ncase \"$last\" in\n");
        for (name, duration) in durations {
            script.push_str(&format!(
                "  */{}) printf '%s' '{{\"format\": {{\"duration\": \"{}\"}}}}' ;;\n",
                name, duration
            ));
        }
        script.push_str("  *) exit 1 ;;\nesac\n");
        write_script(self.dir.path(), "ffprobe", &script)
    }

    /// Create a placeholder media file inside the scratch directory
    pub fn media(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"ID3\x03\x00\x00\x00\x00\x00\x00").unwrap();
        path
    }

    /// Arguments of every engine run so far, in order
    pub fn runs(&self) -> Vec<Vec<String>> {
        let Ok(log) = std::fs::read_to_string(&self.args_log) else {
            return Vec::new();
        };
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for line in log.lines() {
            if line == RUN_SEPARATOR {
                runs.push(std::mem::take(&mut current));
            } else {
                current.push(line.to_string());
            }
        }
        runs
    }

    pub fn last_run(&self) -> Vec<String> {
        self.runs().pop().unwrap_or_default()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Value following `flag` in an argument list
pub fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Config with fast buffering and short grace periods
pub fn test_config(ffmpeg: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ffmpeg_path = ffmpeg.to_path_buf();
    config.terminate_grace = Duration::from_millis(500);
    config.stop_settle = Duration::from_millis(10);
    config.speed_debounce = Duration::from_millis(200);
    config.playback_buffer = BufferPolicy {
        initial_delay: Duration::from_millis(50),
        max_attempts: 60,
        empty_backoff: Duration::from_millis(50),
        growing_backoff: Duration::from_millis(50),
        min_bytes: 200_000,
    };
    config.preview_buffer = BufferPolicy {
        min_bytes: 100_000,
        ..config.playback_buffer
    };
    config
}

/// Probe answering from a fixed table
pub struct FakeProbe {
    durations: HashMap<PathBuf, f64>,
}

impl FakeProbe {
    pub fn new(entries: impl IntoIterator<Item = (PathBuf, f64)>) -> Self {
        Self {
            durations: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn probe(&self, path: &Path) -> Option<f64> {
        self.durations.get(path).copied()
    }
}

/// Audio device recording every call
#[derive(Default)]
pub struct FakePlayer {
    calls: Mutex<Vec<String>>,
    volume: Mutex<Option<f32>>,
    loaded: Mutex<Option<PathBuf>>,
    drained: AtomicBool,
}

impl FakePlayer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_volume(&self) -> Option<f32> {
        *self.volume.lock().unwrap()
    }

    pub fn loaded(&self) -> Option<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    /// Behave as if the loaded stream played out to its end
    pub fn finish(&self) {
        self.drained.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl AudioOutputDevice for FakePlayer {
    fn load(&self, path: &Path) -> narramix_engine::Result<()> {
        self.record("load");
        *self.loaded.lock().unwrap() = Some(path.to_path_buf());
        self.drained.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn play(&self) -> narramix_engine::Result<()> {
        self.record("play");
        Ok(())
    }

    fn pause(&self) {
        self.record("pause");
    }

    fn unpause(&self) {
        self.record("unpause");
    }

    fn stop(&self) {
        self.record("stop");
    }

    fn set_volume(&self, volume: f32) {
        self.record("set_volume");
        *self.volume.lock().unwrap() = Some(volume);
    }

    fn is_busy(&self) -> bool {
        self.loaded.lock().unwrap().is_some() && !self.drained.load(Ordering::SeqCst)
    }
}

/// Controller wired to fake engines, with both sources loaded
pub struct Rig {
    pub tools: FakeTools,
    pub player: Arc<FakePlayer>,
    pub controller: PlaybackController,
    pub primary: PathBuf,
    pub background: PathBuf,
}

impl Rig {
    pub async fn new(script: &EngineScript, primary_secs: f64, settings: MixSettings) -> Self {
        let tools = FakeTools::new(script);
        let primary = tools.media("book.mp3");
        let background = tools.media("rain.mp3");
        let player = Arc::new(FakePlayer::default());
        let probe = Arc::new(FakeProbe::new([(primary.clone(), primary_secs)]));

        let controller = PlaybackController::new(
            test_config(&tools.ffmpeg),
            Arc::clone(&player) as Arc<dyn AudioOutputDevice>,
            probe,
            settings,
        );
        assert!(controller.set_primary(MixSource::File(primary.clone())).await.success);
        assert!(controller.set_background(&background).await.success);

        Self {
            tools,
            player,
            controller,
            primary,
            background,
        }
    }
}
