use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use stock_screener::config::DEFAULT_CONFIG_FILE;
use stock_screener::records::RunHistoryEntry;
use stock_screener::screen::{AggregateMetrics, Filters, Row, SortKey};
use stock_screener::utils::{
    display_width, format_duration_ms, format_millis, pad_display, pad_display_left,
    truncate_display,
};

#[derive(Parser, Debug)]
#[command(name = "stock-screener")]
#[command(about = "Screen a universe of symbols against upstream valuation intel")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, filter and rank a universe of symbols
    Scan(ScanArgs),

    /// Re-run a recorded scan with its filters and symbols
    Replay {
        /// Timestamp (epoch millis) shown by `history list`
        timestamp: i64,

        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Inspect or clear recorded runs
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage saved filter presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    List,
    Show { timestamp: i64 },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum PresetAction {
    Save {
        name: String,

        #[command(flatten)]
        filters: FilterArgs,
    },
    List,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Symbols to scan (comma or space separated); defaults to the universe file
    pub symbols: Vec<String>,

    /// CSV file whose first column lists symbols
    #[arg(short, long)]
    pub universe: Option<PathBuf>,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Saved preset applied before any filter flags
    #[arg(short, long)]
    pub preset: Option<String>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop dispatching once this many matches are found
    #[arg(long)]
    pub cap: Option<usize>,

    /// upside, marketCap, momentum or symbol
    #[arg(long)]
    pub sort: Option<SortKey>,

    /// Sort ascending instead of descending
    #[arg(long)]
    pub asc: bool,

    /// Write matches as CSV to this file (or a timestamped file inside this directory)
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Do not record this run in history
    #[arg(long)]
    pub no_history: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub min_upside: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub max_upside: Option<f64>,

    #[arg(long)]
    pub min_cap: Option<f64>,

    #[arg(long)]
    pub max_cap: Option<f64>,

    /// Sector substrings to keep (repeatable or comma separated)
    #[arg(long = "sector", value_delimiter = ',')]
    pub sectors: Vec<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> Filters {
        Filters {
            min_upside: self.min_upside,
            max_upside: self.max_upside,
            market_cap_min: self.min_cap,
            market_cap_max: self.max_cap,
            sectors: self.sectors.clone(),
        }
        .sanitized()
    }
}

const SUMMARY_WIDTH: usize = 40;
const SECTOR_WIDTH: usize = 18;

pub fn render_rows(rows: &[Row]) -> String {
    let headers = ["Symbol", "Sector", "Upside", "Price", "Fair", "Cap", "Mom", "Summary"];
    let cells: Vec<[String; 8]> = rows
        .iter()
        .map(|row| {
            [
                row.symbol.clone(),
                truncate_display(&row.sector, SECTOR_WIDTH),
                row.upside.map(|v| format!("{v:+.1}%")).unwrap_or_else(dash),
                row.price.map(|v| format!("{v:.2}")).unwrap_or_else(dash),
                row.fair_value.map(|v| format!("{v:.2}")).unwrap_or_else(dash),
                row.market_cap.map(compact_number).unwrap_or_else(dash),
                row.momentum.map(|v| format!("{v:.1}")).unwrap_or_else(dash),
                truncate_display(&row.summary, SUMMARY_WIDTH),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(display_width(cell));
        }
    }

    let numeric = |column: usize| (2..=6).contains(&column);
    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                if numeric(i) {
                    pad_display_left(value, widths[i])
                } else {
                    pad_display(value, widths[i])
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in &cells {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

pub fn render_metrics(metrics: &AggregateMetrics) -> String {
    let pct = |value: Option<f64>| value.map(|v| format!("{v:+.2}%")).unwrap_or_else(dash);
    let mut lines = vec![
        format!(
            "matches: {}  (up {} / down {} / flat {})",
            metrics.count,
            metrics.positive_upside_count,
            metrics.negative_upside_count,
            metrics.zero_upside_count
        ),
        format!(
            "upside: avg {}  median {}",
            pct(metrics.avg_upside),
            pct(metrics.median_upside)
        ),
    ];
    if let Some(best) = &metrics.best_upside {
        lines.push(format!("best upside: {} ({:+.1}%)", best.symbol, best.value));
    }
    if let Some(worst) = &metrics.worst_upside {
        lines.push(format!("worst upside: {} ({:+.1}%)", worst.symbol, worst.value));
    }
    if let Some(momentum) = &metrics.best_momentum {
        lines.push(format!("best momentum: {} ({:.1})", momentum.symbol, momentum.value));
    }
    if let Some(total) = metrics.total_market_cap {
        lines.push(format!("total market cap: {}", compact_number(total)));
    }
    if !metrics.sector_leaders.is_empty() {
        let leaders: Vec<String> = metrics
            .sector_leaders
            .iter()
            .map(|s| format!("{} {} ({:.0}%)", s.name, s.count, s.weight * 100.0))
            .collect();
        lines.push(format!("sectors: {}", leaders.join(", ")));
    }
    lines.join("\n")
}

pub fn render_history(entries: &[RunHistoryEntry]) -> String {
    if entries.is_empty() {
        return "No recorded runs.".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {}  {:>4} symbols  {:>4} matches  {:>3} errors  {:>7}{}",
                entry.timestamp,
                format_millis(entry.timestamp),
                entry.universe_count,
                entry.matches,
                entry.error_count,
                format_duration_ms(entry.duration_ms),
                if entry.reached_cap { "  (capped)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn dash() -> String {
    "-".to_string()
}

fn compact_number(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1e12 {
        format!("{:.2}T", value / 1e12)
    } else if magnitude >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if magnitude >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else {
        format!("{value:.0}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_flags() {
        let cli = Cli::try_parse_from([
            "stock-screener",
            "scan",
            "aapl,msft",
            "--min-upside",
            "-5",
            "--sector",
            "Tech,Energy",
            "--sort",
            "marketCap",
            "--cap",
            "10",
        ])
        .expect("parse");

        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.symbols, ["aapl,msft"]);
        assert_eq!(args.filters.min_upside, Some(-5.0));
        assert_eq!(args.filters.sectors, ["Tech", "Energy"]);
        assert_eq!(args.sort, Some(SortKey::MarketCap));
        assert_eq!(args.cap, Some(10));
    }

    #[test]
    fn table_aligns_wide_characters() {
        let rows = vec![Row {
            symbol: "7203".to_string(),
            sector: "自動車".to_string(),
            upside: Some(12.345),
            market_cap: Some(3.2e13),
            ..Row::default()
        }];
        let table = render_rows(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("+12.3%"));
        assert!(lines[2].contains("32.00T"));
    }
}
