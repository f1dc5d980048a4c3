//! Engine diagnostic stream helpers
//!
//! The engine writes progress (`time=HH:MM:SS.ff`) and errors to stderr.
//! [`DiagnosticLog`] keeps a bounded copy of that stream for failure
//! summaries while the supervising session consumes lines for progress.

use std::sync::{Arc, Mutex, PoisonError};

/// Characters retained by a [`DiagnosticLog`]
const LOG_CAPACITY: usize = 64 * 1024;

/// Characters shown when no error lines are recognised
pub const TAIL_CHARS: usize = 500;

/// Error lines kept in a failure summary
const SUMMARY_LINES: usize = 5;

const ERROR_MARKERS: [&str; 3] = ["error", "invalid", "failed"];

/// Parse the `time=HH:MM:SS.fraction` marker of a stats line into seconds
pub fn parse_progress_time(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let token = line[start..].split_whitespace().next()?;

    let mut parts = token.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Last `n` characters of `text`
pub fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Condense engine diagnostics into a short failure message
///
/// Prefers the last few lines mentioning an error; otherwise falls back to
/// the tail of the stream.
pub fn error_summary(text: &str) -> String {
    let error_lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .collect();

    if error_lines.is_empty() {
        return tail_chars(text.trim(), TAIL_CHARS).to_string();
    }

    let skip = error_lines.len().saturating_sub(SUMMARY_LINES);
    error_lines[skip..].join("\n")
}

/// Bounded, shareable copy of an engine's diagnostic stream
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    text: Arc<Mutex<String>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line, discarding the oldest text beyond the capacity
    pub fn push(&self, line: &str) {
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        text.push_str(line);
        text.push('\n');

        if text.len() > LOG_CAPACITY {
            let mut cut = text.len() - LOG_CAPACITY;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.drain(..cut);
        }
    }

    pub fn text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last [`TAIL_CHARS`] characters
    pub fn tail(&self) -> String {
        tail_chars(self.text().trim(), TAIL_CHARS).to_string()
    }

    pub fn summary(&self) -> String {
        error_summary(&self.text())
    }
}
