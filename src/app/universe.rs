use std::collections::HashSet;
use std::path::Path;

use crate::error::{AppError, Context, Result};

/// Trim, uppercase and dedupe symbols, keeping first-seen order.
pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .flat_map(|raw| {
            raw.as_ref()
                .split([',', ' '])
                .map(|part| part.trim().to_uppercase())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

/// Read symbols from the first column of a CSV file. A `symbol` header row is skipped.
pub fn load_universe(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(AppError::message(format!(
            "Universe file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open universe file {}", path.display()))?;

    let mut raw = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        if let Some(cell) = record.get(0) {
            let cell = cell.trim();
            if cell.is_empty() || cell.starts_with('#') || cell.eq_ignore_ascii_case("symbol") {
                continue;
            }
            raw.push(cell.to_string());
        }
    }

    let symbols = normalize_symbols(raw);
    if symbols.is_empty() {
        return Err(AppError::message(format!(
            "Universe file is empty: {}",
            path.display()
        )));
    }
    Ok(symbols)
}
