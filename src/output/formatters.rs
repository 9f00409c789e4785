//! Display helpers for sizes, timestamps and durations

use chrono::{DateTime, Local, Utc};

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Local date and time, e.g. `2026-03-01 10:00`
pub fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Unix seconds as local date and time, "unknown" when out of range
pub fn format_unix(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(format_local)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Compact relative time until `ts`: "now", "in 42s", "in 3m", "in 2h"
pub fn format_until(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (ts - now).num_seconds();
    if secs <= 0 {
        "now".to_string()
    } else if secs < 60 {
        format!("in {}s", secs)
    } else if secs < 3600 {
        format!("in {}m", secs / 60)
    } else {
        format!("in {}h", secs / 3600)
    }
}

/// Shorten long text for table cells
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
