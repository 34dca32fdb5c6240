pub mod file;
pub mod text;
pub mod time;

pub use file::list_json_files;
pub use text::{display_width, pad_display, pad_display_left, sanitize_preset_name, truncate_display};
pub use time::{export_timestamp_slug, format_duration_ms, format_millis, now_millis};
