//! Human-readable duration formatting for the progress board and session summary

use std::time::Duration;

/// Formatting thresholds (seconds)
const SHORT_FORMAT_MAX: u64 = 100; // < 100s → X.XXs
const MEDIUM_FORMAT_MAX: u64 = 6000; // < 100m → M:SS
                                     // >= 100m → H:MM:SS

/// Format a duration by magnitude
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use stemcap_common::human_time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(4_250)), "4.25s");
/// assert_eq!(format_duration(Duration::from_secs(330)), "5:30");
/// assert_eq!(format_duration(Duration::from_secs(7_261)), "2:01:01");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < SHORT_FORMAT_MAX {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < MEDIUM_FORMAT_MAX {
        format!("{}:{:02}", secs / 60, secs % 60)
    } else {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format a byte count with binary units (`3.4 MiB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
