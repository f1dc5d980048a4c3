//! Engine argument vectors
//!
//! Wraps a [`FilterGraph`] with inputs, the output duration cap and one of
//! two output profiles.

use super::filter_graph::FilterGraph;
use super::fmt_seconds;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Output format for an engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputProfile {
    /// Mono 22050 Hz 16-bit WAV for the playback device
    Playback,
    /// 192 kbit/s 44.1 kHz MP3 export
    Render,
}

impl OutputProfile {
    fn args(self) -> &'static [&'static str] {
        match self {
            OutputProfile::Playback => &[
                "-ac", "1", "-ar", "22050", "-acodec", "pcm_s16le", "-f", "wav",
            ],
            OutputProfile::Render => &[
                "-c:a", "libmp3lame", "-b:a", "192k", "-ar", "44100", "-q:a", "2",
                "-threads", "0", "-loglevel", "warning", "-stats",
            ],
        }
    }
}

/// How the primary reaches the engine
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryInput {
    File(PathBuf),
    ConcatList(PathBuf),
}

/// One complete engine run
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub primary: PrimaryInput,
    pub background: PathBuf,
    pub graph: FilterGraph,
    /// Output duration cap in seconds
    pub duration_cap: Option<f64>,
    pub profile: OutputProfile,
    pub output: PathBuf,
}

impl EngineInvocation {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-nostdin".into()];

        match &self.primary {
            PrimaryInput::File(path) => {
                if let Some(seek) = self.graph.input_seek {
                    args.push("-ss".into());
                    args.push(fmt_seconds(seek).into());
                }
                args.push("-i".into());
                args.push(path.into());
            }
            PrimaryInput::ConcatList(list) => {
                args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
                args.push(list.into());
            }
        }

        args.extend(["-stream_loop", "-1", "-i"].map(OsString::from));
        args.push(self.background.clone().into());

        args.push("-filter_complex".into());
        args.push(self.graph.filter_complex.clone().into());
        args.push("-map".into());
        args.push("[out]".into());

        if let Some(cap) = self.duration_cap {
            args.push("-t".into());
            args.push(fmt_seconds(cap).into());
        }

        args.extend(self.profile.args().iter().map(OsString::from));
        args.push("-y".into());
        args.push(self.output.clone().into());
        args
    }

    /// Ready-to-spawn command with stdin detached and stderr piped
    pub fn command(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Argument vector as one loggable line
    pub fn display_args(&self) -> String {
        self.args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
