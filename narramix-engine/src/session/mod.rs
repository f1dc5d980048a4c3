//! Engine subprocess supervision
//!
//! A session owns exactly one engine subprocess and the temporary files that
//! run needs. Render sessions produce a finished file; stream sessions feed
//! the playback device from a growing buffer.

pub mod diagnostics;
pub mod process;
pub mod progress;
pub mod render;
pub mod stream;

pub use diagnostics::{error_summary, parse_progress_time, DiagnosticLog};
pub use process::EngineProcess;
pub use progress::{ProgressModel, RenderProgress};
pub use render::{RenderPhase, RenderReport, RenderRequest, RenderSession};
pub use stream::{
    await_buffered, BufferOutcome, BufferPolicy, FileSizeOracle, OutputSizeOracle, StreamPhase,
    StreamRequest, StreamSession,
};
