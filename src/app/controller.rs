use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStats, RequestCache};
use crate::config::{validator::validate_filters, ScreenerConfig};
use crate::error::{AppError, Result};
use crate::fetch::{FetchedItem, IntelFetcher};
use crate::records::{export_rows, Records, RunHistoryEntry, RunHistoryStore};
use crate::scan::{BatchPool, ItemFailure, ItemProgress, ScanError, ScanWarning};
use crate::screen::{sort_rows, AggregateMetrics, Filters, Row, SortSpec};
use crate::utils::now_millis;

const UNIVERSE_SAMPLE: usize = 30;

/// Receives every computed row together with metrics over the matches so far.
pub type ProgressSink = Arc<dyn Fn(&ItemProgress<'_>, &AggregateMetrics) + Send + Sync>;
pub type FailureSink = Arc<dyn Fn(&ItemFailure<'_>) + Send + Sync>;

/// One scan to run.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub universe: Vec<String>,
    pub filters: Filters,
    pub sort: SortSpec,
    pub concurrency: Option<usize>,
    pub batch_cap: Option<usize>,
    pub record_history: bool,
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Sorted by the request's [`SortSpec`].
    pub matches: Vec<Row>,
    pub metrics: AggregateMetrics,
    /// Every computed row in completion order, accepted or not.
    pub processed: Vec<Row>,
    pub universe_count: usize,
    pub errors: Vec<ScanError>,
    pub warnings: Vec<ScanWarning>,
    pub reached_cap: bool,
    pub duration_ms: u64,
    pub history_entry: Option<RunHistoryEntry>,
    pub exported_to: Option<PathBuf>,
}

/// Owns the long-lived handles (fetcher with its cache, run history, presets) for a session.
pub struct ScreenerApp {
    config: ScreenerConfig,
    fetcher: IntelFetcher,
    records: Records,
    history: RunHistoryStore,
    on_progress: Option<ProgressSink>,
    on_failure: Option<FailureSink>,
}

impl ScreenerApp {
    pub fn new(config: ScreenerConfig) -> Result<Self> {
        let cache = RequestCache::new(config.cache.options());
        let fetcher = IntelFetcher::new(config.provider.clone(), cache)?;
        let records = Records::from_config(&config);
        let history = records.history(config.history.max_entries);

        Ok(Self {
            config,
            fetcher,
            records,
            history,
            on_progress: None,
            on_failure: None,
        })
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.on_progress = Some(sink);
        self
    }

    pub fn with_failures(mut self, sink: FailureSink) -> Self {
        self.on_failure = Some(sink);
        self
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn history(&self) -> &RunHistoryStore {
        &self.history
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.fetcher.cache().stats()
    }

    /// Request seeded from configuration defaults.
    pub fn default_request(&self, universe: Vec<String>) -> ScanRequest {
        ScanRequest {
            universe,
            filters: self.config.filters.clone(),
            sort: self.config.sort,
            concurrency: self.config.scan.concurrency,
            batch_cap: self.config.scan.batch_cap,
            record_history: true,
            export: None,
        }
    }

    /// Scan against the configured upstream.
    pub async fn scan(&self, request: ScanRequest, cancel: CancellationToken) -> Result<ScanReport> {
        let fetcher = &self.fetcher;
        self.scan_with(request, cancel, move |symbol| async move {
            fetcher.fetch_item(&symbol).await
        })
        .await
    }

    /// Re-run a recorded scan with its filters, sort and universe sample.
    pub async fn replay(
        &self,
        timestamp: i64,
        export: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<ScanReport> {
        let request = self.replay_request(timestamp, export)?;
        self.scan(request, cancel).await
    }

    pub fn replay_request(&self, timestamp: i64, export: Option<PathBuf>) -> Result<ScanRequest> {
        let entry = self.history.find(timestamp).ok_or_else(|| {
            AppError::message(format!("No recorded run with timestamp {timestamp}"))
        })?;
        if entry.universe_sample.is_empty() {
            return Err(AppError::message(format!(
                "Run {timestamp} has no recorded symbols to replay"
            )));
        }

        Ok(ScanRequest {
            universe: entry.universe_sample,
            filters: entry.filters,
            sort: entry.sort,
            concurrency: self.config.scan.concurrency,
            batch_cap: self.config.scan.batch_cap,
            record_history: true,
            export,
        })
    }

    /// Scan with an injected item fetcher.
    pub async fn scan_with<F, Fut>(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
        fetch: F,
    ) -> Result<ScanReport>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<FetchedItem>>,
    {
        validate_filters(&request.filters)?;
        if request.universe.is_empty() {
            return Err(AppError::validation("no symbols to scan"));
        }

        let started = Instant::now();
        info!(
            "scanning {} symbols (sort: {}, cap: {})",
            request.universe.len(),
            request.sort,
            request
                .batch_cap
                .map(|cap| cap.to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        let pool = self.build_pool(&request, cancel);
        let outcome = pool.run(&request.universe, fetch).await?;

        let mut matches = outcome.matches;
        sort_rows(&mut matches, request.sort);
        let metrics = AggregateMetrics::compute(&matches);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !outcome.errors.is_empty() {
            warn!(
                "{} of {} symbols failed",
                outcome.errors.len(),
                request.universe.len()
            );
        }

        let history_entry = request.record_history.then(|| {
            self.history.record(RunHistoryEntry {
                timestamp: now_millis(),
                universe_count: request.universe.len(),
                matches: matches.len(),
                duration_ms,
                reached_cap: outcome.reached_cap,
                error_count: outcome.errors.len(),
                filters: request.filters.clone(),
                sort: request.sort,
                universe_sample: request.universe.iter().take(UNIVERSE_SAMPLE).cloned().collect(),
                metrics: metrics.clone(),
            })
        });

        let exported_to = match &request.export {
            Some(path) => {
                export_rows(path, &matches)?;
                info!("exported {} rows to {}", matches.len(), path.display());
                Some(path.clone())
            }
            None => None,
        };

        Ok(ScanReport {
            matches,
            metrics,
            processed: outcome.processed,
            universe_count: request.universe.len(),
            errors: outcome.errors,
            warnings: outcome.warnings,
            reached_cap: outcome.reached_cap,
            duration_ms,
            history_entry,
            exported_to,
        })
    }

    fn build_pool(&self, request: &ScanRequest, cancel: CancellationToken) -> BatchPool {
        let mut pool = BatchPool::new(request.filters.clone())
            .concurrency(request.concurrency)
            .batch_cap(request.batch_cap)
            .cancellation(cancel);

        if let Some(sink) = self.on_progress.clone() {
            let accepted: Mutex<Vec<Row>> = Mutex::new(Vec::new());
            pool = pool.on_item(move |progress| {
                let metrics = {
                    let mut rows = accepted.lock().unwrap_or_else(PoisonError::into_inner);
                    if progress.passes {
                        rows.push(progress.row.clone());
                    }
                    AggregateMetrics::compute(&rows)
                };
                sink(progress, &metrics);
            });
        }
        if let Some(sink) = self.on_failure.clone() {
            pool = pool.on_error(move |failure| sink(failure));
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn app_in(dir: &std::path::Path) -> ScreenerApp {
        let mut config = ScreenerConfig::default();
        config.history.dir = dir.join("history");
        config.presets_dir = dir.join("filters");
        ScreenerApp::new(config).expect("app")
    }

    fn fake_fetch(symbol: String) -> impl Future<Output = Result<FetchedItem>> {
        async move {
            match symbol.as_str() {
                "FAIL" => Err(AppError::message("upstream unavailable")),
                "AAA" => Ok(FetchedItem::new(json!({"sector": "Tech", "upside": 10, "marketCap": 2e12}))),
                "BBB" => Ok(FetchedItem::new(json!({"sector": "Tech", "upside": -5}))),
                _ => Ok(FetchedItem::new(json!({"sector": "Fin", "upside": 30}))
                    .with_warning("stale quote")),
            }
        }
    }

    fn request(symbols: &[&str]) -> ScanRequest {
        ScanRequest {
            universe: symbols.iter().map(|s| s.to_string()).collect(),
            record_history: true,
            ..ScanRequest::default()
        }
    }

    #[tokio::test]
    async fn scan_sorts_records_and_reports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(dir.path());

        let report = app
            .scan_with(request(&["BBB", "FAIL", "AAA", "CCC"]), CancellationToken::new(), fake_fetch)
            .await
            .expect("scan");

        let order: Vec<_> = report.matches.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, ["CCC", "AAA", "BBB"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.metrics.count, 3);
        assert_eq!(report.processed.len(), 3);
        assert!(report.processed.iter().all(|row| row.symbol != "FAIL"));

        let entry = report.history_entry.expect("history entry");
        assert_eq!(entry.universe_count, 4);
        assert_eq!(entry.error_count, 1);
        assert_eq!(app.history().list().len(), 1);
    }

    #[tokio::test]
    async fn progress_sink_sees_running_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let app = app_in(dir.path()).with_progress(Arc::new(move |progress: &ItemProgress<'_>, metrics: &AggregateMetrics| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(metrics.count <= progress.matches);
        }));

        let mut req = request(&["AAA", "BBB"]);
        req.filters.min_upside = Some(0.0);
        req.record_history = false;
        let report = app
            .scan_with(req, CancellationToken::new(), fake_fetch)
            .await
            .expect("scan");

        assert_eq!(report.matches.len(), 1);
        assert!(report.history_entry.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn replay_reuses_recorded_filters_and_exports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(dir.path());

        let mut first = request(&["AAA", "BBB", "CCC"]);
        first.filters.min_upside = Some(5.0);
        let recorded = app
            .scan_with(first, CancellationToken::new(), fake_fetch)
            .await
            .expect("first scan")
            .history_entry
            .expect("recorded");

        let export = dir.path().join("out/replay.csv");
        let replay = app
            .replay_request(recorded.timestamp, Some(export.clone()))
            .expect("replay request");
        assert_eq!(replay.filters.min_upside, Some(5.0));

        let report = app
            .scan_with(replay, CancellationToken::new(), fake_fetch)
            .await
            .expect("replay scan");
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.exported_to.as_deref(), Some(export.as_path()));
        assert!(export.exists());
    }

    #[tokio::test]
    async fn cancelled_scan_records_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(dir.path());
        let token = CancellationToken::new();
        token.cancel();

        let err = app
            .scan_with(request(&["AAA"]), token, fake_fetch)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(app.history().list().is_empty());
    }

    #[test]
    fn unknown_replay_timestamp_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = app_in(dir.path());
        assert!(app.replay_request(123, None).is_err());
    }
}
