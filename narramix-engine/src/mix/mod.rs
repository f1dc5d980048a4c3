//! Mix pipeline construction
//!
//! Everything needed to describe one engine run: the user's mix settings and
//! sources, the filter graph, the concat playlist for multi-file sources, and
//! the final argument vector.

pub mod command;
pub mod concat;
pub mod filter_graph;
pub mod settings;

pub use command::{EngineInvocation, OutputProfile, PrimaryInput};
pub use concat::{escape_concat_path, render_concat_list, write_concat_list};
pub use filter_graph::{tempo_stages, FilterGraph, FilterGraphBuilder};
pub use settings::{db_to_linear, MixSettings, MixSource, MAX_SPEED, MIN_SPEED};

/// Format a time offset for engine arguments (millisecond precision)
pub(crate) fn fmt_seconds(seconds: f64) -> String {
    format!("{:.3}", seconds)
}
