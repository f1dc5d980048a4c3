//! WAV header validation and tail reading
//!
//! The stream engine writes a RIFF/WAVE file whose size fields are only
//! patched when it finishes, so the header is walked chunk by chunk up to
//! `data` and the sample payload is then read until the file stops growing.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub const PLAYBACK_SAMPLE_RATE: u32 = 22050;
pub const PLAYBACK_CHANNELS: u16 = 1;
pub const PLAYBACK_BITS: u16 = 16;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Chunks other than `fmt ` allowed before `data`
const MAX_CHUNKS: usize = 32;

/// Format description read from a WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset of the first sample
    pub data_offset: u64,
}

fn load_error(msg: impl Into<String>) -> Error {
    Error::PlayerLoadFailed(msg.into())
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => load_error("WAV header incomplete"),
        _ => Error::Io(e),
    })?;
    Ok(buf)
}

fn skip<R: Read>(reader: &mut R, bytes: u64) -> Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(bytes), &mut io::sink())?;
    if skipped < bytes {
        return Err(load_error("WAV header incomplete"));
    }
    Ok(())
}

impl WavHeader {
    /// Read the header, leaving `reader` positioned at the first sample
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let riff: [u8; 12] = read_array(reader)?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(load_error("Not a RIFF/WAVE file"));
        }

        let mut offset: u64 = 12;
        let mut format: Option<(u16, u16, u32, u16)> = None;

        for _ in 0..MAX_CHUNKS {
            let chunk: [u8; 8] = read_array(reader)?;
            let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as u64;
            offset += 8;

            match &chunk[0..4] {
                b"fmt " => {
                    if size < 16 {
                        return Err(load_error("WAV fmt chunk too short"));
                    }
                    let fmt: [u8; 16] = read_array(reader)?;
                    format = Some((
                        u16::from_le_bytes([fmt[0], fmt[1]]),
                        u16::from_le_bytes([fmt[2], fmt[3]]),
                        u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]),
                        u16::from_le_bytes([fmt[14], fmt[15]]),
                    ));
                    let rest = size - 16 + (size & 1);
                    skip(reader, rest)?;
                    offset += size + (size & 1);
                }
                b"data" => {
                    let (audio_format, channels, sample_rate, bits_per_sample) =
                        format.ok_or_else(|| load_error("WAV data chunk before fmt chunk"))?;
                    return Ok(Self {
                        audio_format,
                        channels,
                        sample_rate,
                        bits_per_sample,
                        data_offset: offset,
                    });
                }
                _ => {
                    let padded = size + (size & 1);
                    skip(reader, padded)?;
                    offset += padded;
                }
            }
        }

        Err(load_error("WAV data chunk not found"))
    }

    /// Check the format matches what the playback profile produces
    pub fn validate_playback(&self) -> Result<()> {
        if self.audio_format != FORMAT_PCM && self.audio_format != FORMAT_EXTENSIBLE {
            return Err(load_error(format!(
                "Unsupported WAV encoding (format tag {})",
                self.audio_format
            )));
        }
        if self.channels != PLAYBACK_CHANNELS
            || self.sample_rate != PLAYBACK_SAMPLE_RATE
            || self.bits_per_sample != PLAYBACK_BITS
        {
            return Err(load_error(format!(
                "Expected mono {} Hz {}-bit audio, got {} ch {} Hz {}-bit",
                PLAYBACK_SAMPLE_RATE,
                PLAYBACK_BITS,
                self.channels,
                self.sample_rate,
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

/// Reader of 16-bit samples from a WAV file that may still be growing
pub struct PcmTail {
    file: File,
    leftover: Option<u8>,
    buf: Vec<u8>,
}

impl PcmTail {
    /// Open `path`, validating its header for playback
    pub fn open(path: &Path) -> Result<(Self, WavHeader)> {
        let mut file = File::open(path)
            .map_err(|e| load_error(format!("{}: {}", path.display(), e)))?;
        let header = WavHeader::read(&mut file)?;
        header.validate_playback()?;
        Ok((
            Self {
                file,
                leftover: None,
                buf: vec![0u8; 8192],
            },
            header,
        ))
    }

    /// Append up to `max_samples` newly written samples to `out`
    ///
    /// Returns the number appended; 0 means nothing new has been written yet.
    pub fn read_samples(&mut self, out: &mut Vec<i16>, max_samples: usize) -> io::Result<usize> {
        let want = (max_samples * 2).min(self.buf.len());
        if want == 0 {
            return Ok(0);
        }
        let read = self.file.read(&mut self.buf[..want])?;
        if read == 0 {
            return Ok(0);
        }

        let before = out.len();
        let mut bytes = &self.buf[..read];
        if let Some(low) = self.leftover.take() {
            out.push(i16::from_le_bytes([low, bytes[0]]));
            bytes = &bytes[1..];
        }
        let mut pairs = bytes.chunks_exact(2);
        out.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
        self.leftover = pairs.remainder().first().copied();

        Ok(out.len() - before)
    }
}
