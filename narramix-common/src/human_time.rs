//! Human-readable time formatting
//!
//! Two shapes are used across narramix:
//! - Clock format (`M:SS`) for playback positions and durations
//! - Remaining-time format (`45s`, `3m 12s`, `1h 5m`) for render ETAs

/// Format seconds as `M:SS`, minutes unbounded.
///
/// Negative and non-finite inputs render as `0:00`.
///
/// ```
/// use narramix_common::human_time::format_clock;
///
/// assert_eq!(format_clock(0.0), "0:00");
/// assert_eq!(format_clock(65.9), "1:05");
/// assert_eq!(format_clock(3725.0), "62:05");
/// ```
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Format a remaining duration with the two most significant units.
///
/// ```
/// use narramix_common::human_time::format_remaining;
///
/// assert_eq!(format_remaining(45.2), "45s");
/// assert_eq!(format_remaining(192.0), "3m 12s");
/// assert_eq!(format_remaining(3900.0), "1h 5m");
/// ```
pub fn format_remaining(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    if seconds < 60.0 {
        format!("{}s", seconds as u64)
    } else if seconds < 3600.0 {
        let total = seconds as u64;
        format!("{}m {}s", total / 60, total % 60)
    } else {
        let total = seconds as u64;
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}
