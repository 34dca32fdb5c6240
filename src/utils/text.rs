use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Convert a user-facing preset label into a safe filesystem slug.
pub fn sanitize_preset_name(name: &str) -> Option<String> {
    let mut slug = String::new();

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if matches!(ch, ' ' | '-' | '_') {
            slug.push(if ch == ' ' { '_' } else { ch });
        }
    }

    if slug.is_empty() {
        None
    } else {
        Some(slug.to_lowercase())
    }
}

pub fn display_width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}

/// Right-pad `text` with spaces up to `target_width` terminal columns.
pub fn pad_display(text: &str, target_width: usize) -> String {
    let padding = target_width.saturating_sub(display_width(text));
    format!("{}{}", text, " ".repeat(padding))
}

/// Left-pad to `target_width` columns, for numeric cells.
pub fn pad_display_left(text: &str, target_width: usize) -> String {
    let padding = target_width.saturating_sub(display_width(text));
    format!("{}{}", " ".repeat(padding), text)
}

/// Cut `text` to at most `max_width` columns, marking the cut with `…`.
pub fn truncate_display(text: &str, max_width: usize) -> String {
    if display_width(text) <= max_width {
        return text.to_string();
    }
    if max_width == 0 {
        return String::new();
    }

    let budget = max_width - 1;
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        out.push(ch);
    }
    out.push('…');
    out
}
