use std::fs;
use std::io;
use std::path::Path;

use csv::{QuoteStyle, WriterBuilder};

use crate::error::{Context, Result};
use crate::screen::Row;

pub const EXPORT_HEADER: [&str; 8] = [
    "Symbol",
    "Sector",
    "MarketCap",
    "Price",
    "FairValue",
    "Upside",
    "Momentum",
    "Summary",
];

/// Write matches as CSV to `path`, creating parent directories as needed.
pub fn export_rows<P: AsRef<Path>>(path: P, rows: &[Row]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create export directory {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create export file {}", path.display()))?;
    write_rows(file, rows)
}

/// Every field is quoted; embedded double quotes become single quotes.
pub fn write_rows<W: io::Write>(sink: W, rows: &[Row]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(sink);

    writer.write_record(EXPORT_HEADER)?;
    for row in rows {
        writer.write_record([
            clean(&row.symbol),
            clean(&row.sector),
            number(row.market_cap),
            number(row.price),
            number(row.fair_value),
            number(row.upside),
            number(row.momentum),
            clean(&row.summary),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn clean(text: &str) -> String {
    text.replace('"', "'")
}

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
