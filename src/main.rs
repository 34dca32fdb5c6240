mod cli;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use tokio_util::sync::CancellationToken;

use stock_screener::app::{load_universe, normalize_symbols, ScanReport, ScreenerApp};
use stock_screener::config::load_config;
use stock_screener::scan::{ItemFailure, ItemProgress};
use stock_screener::screen::{AggregateMetrics, SortDirection, SortSpec};
use stock_screener::utils::{export_timestamp_slug, format_duration_ms};
use stock_screener::AppError;

use cli::{Cli, Commands, HistoryAction, PresetAction, ScanArgs};

const CANCELLED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).context("Failed to load configuration")?;

    match run(cli.command, ScreenerApp::new(config)?).await {
        Err(err) if is_cancelled(&err) => {
            eprintln!("\nScan cancelled.");
            std::process::exit(CANCELLED_EXIT_CODE);
        }
        other => other,
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AppError>()
        .is_some_and(AppError::is_cancelled)
}

async fn run(command: Commands, app: ScreenerApp) -> Result<()> {
    match command {
        Commands::Scan(args) => {
            let app = with_console_progress(app);
            run_scan(&app, args).await
        }
        Commands::Replay { timestamp, export } => {
            let app = with_console_progress(app);
            let export = export.map(|path| export_path(&path));
            let report = app.replay(timestamp, export, interrupt_token()).await?;
            print_report(&report);
            Ok(())
        }
        Commands::History { action } => run_history(&app, action),
        Commands::Preset { action } => run_preset(&app, action),
    }
}

async fn run_scan(app: &ScreenerApp, args: ScanArgs) -> Result<()> {
    let universe = if args.symbols.is_empty() {
        let path = args
            .universe
            .clone()
            .unwrap_or_else(|| app.config().universe_file.clone());
        load_universe(&path)?
    } else {
        normalize_symbols(&args.symbols)
    };

    let mut request = app.default_request(universe);
    if let Some(name) = &args.preset {
        let preset = app.records().load_preset(name)?;
        request.filters = request.filters.merged_with(&preset);
    }
    request.filters = request.filters.merged_with(&args.filters.to_filters());

    if args.concurrency.is_some() {
        request.concurrency = args.concurrency;
    }
    if args.cap.is_some() {
        request.batch_cap = args.cap;
    }
    let direction = match (args.asc, args.sort) {
        (true, _) => SortDirection::Asc,
        (false, Some(_)) => SortDirection::Desc,
        (false, None) => request.sort.direction,
    };
    request.sort = SortSpec::new(args.sort.unwrap_or(request.sort.key), direction);
    request.record_history = !args.no_history;
    request.export = args.export.as_deref().map(export_path);

    let report = app.scan(request, interrupt_token()).await?;
    print_report(&report);
    Ok(())
}

fn run_history(app: &ScreenerApp, action: HistoryAction) -> Result<()> {
    let history = app.history();
    match action {
        HistoryAction::List => println!("{}", cli::render_history(&history.list())),
        HistoryAction::Show { timestamp } => {
            let entry = history
                .find(timestamp)
                .with_context(|| format!("No recorded run with timestamp {timestamp}"))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        HistoryAction::Clear => {
            history.clear();
            println!("Run history cleared.");
        }
    }
    Ok(())
}

fn run_preset(app: &ScreenerApp, action: PresetAction) -> Result<()> {
    match action {
        PresetAction::Save { name, filters } => {
            let path = app.records().save_preset(&name, &filters.to_filters())?;
            println!("Preset saved to {}", path.display());
        }
        PresetAction::List => {
            let presets = app.records().list_presets();
            if presets.is_empty() {
                println!("No presets in {}", app.records().presets_dir().display());
            }
            for name in presets {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// Cancelled by the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping dispatch");
            trigger.cancel();
        }
    });
    token
}

fn with_console_progress(app: ScreenerApp) -> ScreenerApp {
    app.with_progress(Arc::new(
        |progress: &ItemProgress<'_>, metrics: &AggregateMetrics| {
            let avg = metrics
                .avg_upside
                .map(|v| format!("{v:+.1}%"))
                .unwrap_or_else(|| "-".to_string());
            eprint!(
                "\r[{}/{}] {} matches, avg upside {}{}   ",
                progress.processed,
                progress.total,
                progress.matches,
                avg,
                if progress.reached_cap { " (cap reached)" } else { "" }
            );
            let _ = io::stderr().flush();
        },
    ))
    .with_failures(Arc::new(|failure: &ItemFailure<'_>| {
        warn!(
            "[{}/{}] {} failed: {}",
            failure.processed, failure.total, failure.symbol, failure.error
        );
    }))
}

/// A directory target gets a timestamped file name.
fn export_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(format!("screen_{}.csv", export_timestamp_slug()))
    } else {
        path.to_path_buf()
    }
}

fn print_report(report: &ScanReport) {
    eprintln!();
    if report.matches.is_empty() {
        println!("No symbols matched.");
    } else {
        println!("{}", cli::render_rows(&report.matches));
    }
    println!();
    println!("{}", cli::render_metrics(&report.metrics));
    println!(
        "processed {}/{} in {}{}",
        report.processed.len() + report.errors.len(),
        report.universe_count,
        format_duration_ms(report.duration_ms),
        if report.reached_cap { ", stopped at cap" } else { "" }
    );

    if !report.errors.is_empty() {
        println!("{} failed:", report.errors.len());
        for error in &report.errors {
            println!("  - {}: {}", error.symbol, error.message);
        }
    }
    if let Some(entry) = &report.history_entry {
        println!("recorded as run {}", entry.timestamp);
    }
    if let Some(path) = &report.exported_to {
        println!("exported to {}", path.display());
    }
}
