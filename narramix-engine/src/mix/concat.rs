//! Concat demuxer playlists
//!
//! A multi-file primary is fed to the engine as a playlist, one
//! `file '<path>'` line per entry. Single quotes inside a path are closed,
//! escaped and reopened (`'` becomes `'\''`).

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// Escape a path for a quoted concat entry
pub fn escape_concat_path(path: &str) -> String {
    path.replace('\'', "'\\''")
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Playlist text for `paths` in order
///
/// Relative paths are resolved against the current directory because the
/// engine resolves entries relative to the playlist's own location.
pub fn render_concat_list(paths: &[PathBuf]) -> Result<String> {
    if paths.is_empty() {
        return Err(Error::SourceMissing(
            "Cannot build a concat list from zero files".to_string(),
        ));
    }

    let mut list = String::new();
    for path in paths {
        let path = absolute(path)?;
        list.push_str("file '");
        list.push_str(&escape_concat_path(&path.to_string_lossy()));
        list.push_str("'\n");
    }
    Ok(list)
}

/// Write the playlist to a temporary file, deleted when the path is dropped
pub fn write_concat_list(paths: &[PathBuf]) -> Result<TempPath> {
    let list = render_concat_list(paths)?;
    let mut file = tempfile::Builder::new()
        .prefix("narramix-concat-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(list.as_bytes())?;
    file.flush()?;

    let path = file.into_temp_path();
    debug!(entries = paths.len(), list = %path.display(), "Wrote concat list");
    Ok(path)
}
