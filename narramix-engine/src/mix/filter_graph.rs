//! Filter-graph construction
//!
//! Produces the `-filter_complex` description mixing the primary chain
//! (`[0:a]`) with the looping background (`[1:a]`).
//!
//! Layout:
//! ```text
//! [0:a]{trim,asetpts}{aresample}{atempo...}volume=PdB[a];
//! [1:a]{aresample}volume=BdB[m];
//! [a][m]amix=inputs=2:duration=first:dropout_transition=0[out]
//! ```
//!
//! The background never carries a trim: it is looped on input and the output
//! duration cap truncates the mix.

use super::fmt_seconds;
use super::settings::MixSettings;

/// Upper bound of a single tempo stage
const TEMPO_STAGE_MAX: f64 = 2.0;

/// Lower bound of a single tempo stage
const TEMPO_STAGE_MIN: f64 = 0.5;

/// Split `speed` into tempo factors each within `[0.5, 2.0]`
///
/// The product of the returned stages equals `speed`. A speed of exactly 1.0
/// (or a non-positive/non-finite one) yields no stages.
pub fn tempo_stages(speed: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !speed.is_finite() || speed <= 0.0 {
        return stages;
    }

    let mut remaining = speed;
    while remaining > TEMPO_STAGE_MAX {
        stages.push(TEMPO_STAGE_MAX);
        remaining /= TEMPO_STAGE_MAX;
    }
    while remaining < TEMPO_STAGE_MIN {
        stages.push(TEMPO_STAGE_MIN);
        remaining /= TEMPO_STAGE_MIN;
    }
    if (remaining - 1.0).abs() > f64::EPSILON {
        stages.push(remaining);
    }
    stages
}

fn tempo_filter(stage: f64) -> String {
    if stage == TEMPO_STAGE_MAX {
        "atempo=2.0".to_string()
    } else if stage == TEMPO_STAGE_MIN {
        "atempo=0.5".to_string()
    } else {
        format!("atempo={:.3}", stage)
    }
}

fn volume_filter(gain_db: f64) -> String {
    format!("volume={}dB", gain_db)
}

/// Built filter graph plus the seek the engine must apply on input
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub filter_complex: String,
    /// Pre-input offset for the primary (single-file sources only)
    pub input_seek: Option<f64>,
}

/// Builder for the mix filter graph
///
/// Seek and preview spans are in the primary source timeline (before tempo).
#[derive(Debug, Clone)]
pub struct FilterGraphBuilder {
    speed: f64,
    primary_gain_db: f64,
    background_gain_db: f64,
    seek: f64,
    preview: Option<f64>,
    multi_file: bool,
    resample: Option<u32>,
}

impl FilterGraphBuilder {
    pub fn new(settings: &MixSettings) -> Self {
        Self {
            speed: settings.speed(),
            primary_gain_db: settings.primary_gain_db,
            background_gain_db: settings.background_gain_db,
            seek: 0.0,
            preview: None,
            multi_file: false,
            resample: None,
        }
    }

    /// Override the speed without clamping (tempo chaining handles any ratio)
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn seek(mut self, seconds: f64) -> Self {
        self.seek = seconds.max(0.0);
        self
    }

    /// Limit a multi-file trim to `seconds` of source after the seek point
    pub fn preview(mut self, seconds: Option<f64>) -> Self {
        self.preview = seconds;
        self
    }

    pub fn multi_file(mut self, multi_file: bool) -> Self {
        self.multi_file = multi_file;
        self
    }

    /// Resample both tracks to `rate` at the head of each chain
    pub fn resample(mut self, rate: u32) -> Self {
        self.resample = Some(rate);
        self
    }

    pub fn build(&self) -> FilterGraph {
        let mut primary = Vec::new();

        let trims = self.multi_file && self.seek > 0.0;
        if trims {
            let mut trim = format!("atrim=start={}", fmt_seconds(self.seek));
            if let Some(span) = self.preview {
                trim.push_str(&format!(":end={}", fmt_seconds(self.seek + span)));
            }
            primary.push(trim);
            primary.push("asetpts=PTS-STARTPTS".to_string());
        }

        if let Some(rate) = self.resample {
            primary.push(format!("aresample={}", rate));
        }
        primary.extend(tempo_stages(self.speed).into_iter().map(tempo_filter));
        primary.push(volume_filter(self.primary_gain_db));

        let mut background = Vec::new();
        if let Some(rate) = self.resample {
            background.push(format!("aresample={}", rate));
        }
        background.push(volume_filter(self.background_gain_db));

        let filter_complex = format!(
            "[0:a]{}[a];[1:a]{}[m];[a][m]amix=inputs=2:duration=first:dropout_transition=0[out]",
            primary.join(","),
            background.join(","),
        );

        let input_seek = (!self.multi_file && self.seek > 0.0).then_some(self.seek);

        FilterGraph {
            filter_complex,
            input_seek,
        }
    }
}
