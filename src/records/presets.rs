use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::validator::validate_filters;
use crate::error::{AppError, Context, Result};
use crate::screen::Filters;
use crate::utils::{list_json_files, sanitize_preset_name};

/// Persist `filters` as `<dir>/<slug>.json`, returning the written path.
pub fn save_filters(dir: &Path, name: &str, filters: &Filters) -> Result<PathBuf> {
    let slug = sanitize_preset_name(name)
        .ok_or_else(|| AppError::validation(format!("preset name `{name}` has no usable characters")))?;
    let filters = filters.sanitized();
    validate_filters(&filters)?;

    fs::create_dir_all(dir).context("Failed to create presets directory")?;
    let path = dir.join(format!("{slug}.json"));

    let json =
        serde_json::to_string_pretty(&filters).context("Failed to serialize filters for preset")?;

    let mut file = fs::File::create(&path)
        .with_context(|| format!("Failed to create preset file {}", path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write preset file {}", path.display()))?;

    Ok(path)
}

pub fn load_filters(path: &Path) -> Result<Filters> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read preset file {}", path.display()))?;
    let filters: Filters = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse preset file {}", path.display()))?;
    let filters = filters.sanitized();
    validate_filters(&filters)?;
    Ok(filters)
}

/// Resolve a preset by name (slugged the same way as on save).
pub fn load_named(dir: &Path, name: &str) -> Result<Filters> {
    let slug = sanitize_preset_name(name)
        .ok_or_else(|| AppError::validation(format!("preset name `{name}` has no usable characters")))?;
    let path = dir.join(format!("{slug}.json"));
    if !path.exists() {
        return Err(AppError::message(format!(
            "Preset `{}` not found in {}",
            slug,
            dir.display()
        )));
    }
    load_filters(&path)
}

pub fn list_presets(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = list_json_files(dir)
        .into_iter()
        .map(|file| file.stem)
        .collect();
    names.sort();
    names
}
