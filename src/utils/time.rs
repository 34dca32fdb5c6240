use chrono::{Local, TimeZone, Utc};

/// Milliseconds since the Unix epoch; run-history entries are keyed by this.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render an epoch-millis timestamp in local time, falling back to the raw number.
pub fn format_millis(timestamp: i64) -> String {
    match Local.timestamp_millis_opt(timestamp).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

pub fn export_timestamp_slug() -> String {
    Local::now().format("%Y_%m_%d_%H_%M").to_string()
}

pub fn format_duration_ms(duration_ms: u64) -> String {
    if duration_ms < 1_000 {
        format!("{duration_ms}ms")
    } else {
        format!("{:.1}s", duration_ms as f64 / 1_000.0)
    }
}
