use serde_json::Value;

/// Follow `path` through nested objects.
pub fn walk_path<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |cursor, key| cursor.get(*key))
}

/// First value found among alternative paths.
pub fn first_present<'a>(root: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| walk_path(root, path))
        .find(|value| !value.is_null())
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numbers and numeric strings (`"12.5"`, `"12.5%"`, `"1,200"`); anything non-finite is `None`.
pub fn finite_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_f64(s),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

pub fn parse_f64(value: &str) -> Option<f64> {
    let cleaned: String = value
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|ch| *ch != ',' && *ch != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}
