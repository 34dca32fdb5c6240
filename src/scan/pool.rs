use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use log::{debug, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::fetch::{resolve_concurrency, FetchedItem};
use crate::screen::{Filters, Row};

/// Snapshot handed to the progress callback once per computed row.
#[derive(Debug)]
pub struct ItemProgress<'a> {
    pub symbol: &'a str,
    pub index: usize,
    pub row: &'a Row,
    pub passes: bool,
    pub total: usize,
    pub processed: usize,
    pub matches: usize,
    pub reached_cap: bool,
}

#[derive(Debug)]
pub struct ItemFailure<'a> {
    pub symbol: &'a str,
    pub index: usize,
    pub error: &'a AppError,
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanError {
    pub symbol: String,
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanWarning {
    pub symbol: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    /// Accepted rows in completion order, never more than `batch_cap`.
    pub matches: Vec<Row>,
    /// Every computed row, whether or not it passed the filters.
    pub processed: Vec<Row>,
    pub errors: Vec<ScanError>,
    pub warnings: Vec<ScanWarning>,
    pub reached_cap: bool,
}

type ProgressHook = Box<dyn Fn(&ItemProgress<'_>) + Send + Sync>;
type FailureHook = Box<dyn Fn(&ItemFailure<'_>) + Send + Sync>;

/// Runs a fetcher over a universe with a bounded number of calls in flight.
///
/// Workers pull indices off a shared cursor, so each symbol is fetched at most once.
/// Dispatch stops once `batch_cap` matches are in. Work already claimed still
/// completes and lands in `processed`, but rows that pass after the cap is met
/// are not accepted.
pub struct BatchPool {
    filters: Filters,
    concurrency: Option<usize>,
    batch_cap: Option<usize>,
    cancel: CancellationToken,
    on_item: Option<ProgressHook>,
    on_error: Option<FailureHook>,
}

struct RunState<'u> {
    universe: &'u [String],
    cursor: AtomicUsize,
    outcome: Mutex<ScanOutcome>,
}

impl RunState<'_> {
    fn lock(&self) -> MutexGuard<'_, ScanOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScanOutcome {
    /// Items finished so far, computed or failed.
    fn completed(&self) -> usize {
        self.processed.len() + self.errors.len()
    }
}

impl BatchPool {
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            concurrency: None,
            batch_cap: None,
            cancel: CancellationToken::new(),
            on_item: None,
            on_error: None,
        }
    }

    pub fn concurrency(mut self, concurrency: Option<usize>) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn batch_cap(mut self, batch_cap: Option<usize>) -> Self {
        self.batch_cap = batch_cap;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_item<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ItemProgress<'_>) + Send + Sync + 'static,
    {
        self.on_item = Some(Box::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ItemFailure<'_>) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Fetch, reduce and filter every symbol.
    ///
    /// Per-item failures are collected in the outcome. Cancellation aborts the run
    /// with a single [`AppError::Cancelled`].
    pub async fn run<F, Fut>(&self, universe: &[String], fetch: F) -> Result<ScanOutcome>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<FetchedItem>>,
    {
        let total = universe.len();
        if total == 0 {
            return Ok(ScanOutcome::default());
        }

        let workers = resolve_concurrency(self.concurrency, total);
        debug!("scanning {total} symbols with {workers} workers");

        let state = RunState {
            universe,
            cursor: AtomicUsize::new(0),
            outcome: Mutex::new(ScanOutcome::default()),
        };

        try_join_all((0..workers).map(|_| self.worker(&state, &fetch))).await?;

        Ok(state
            .outcome
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner))
    }

    async fn worker<F, Fut>(&self, state: &RunState<'_>, fetch: &F) -> Result<()>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<FetchedItem>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let Some(index) = self.claim(state) else {
                return Ok(());
            };
            let symbol = state.universe[index].as_str();

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
                result = fetch(symbol.to_string()) => result,
            };

            let computed = fetched.and_then(|item| {
                let row = Row::from_payload(symbol, &item.data)?;
                Ok((row, item.warning))
            });

            match computed {
                Ok((row, warning)) => self.record_row(state, index, row, warning),
                Err(err) if err.is_cancelled() => return Err(AppError::Cancelled),
                Err(err) => self.record_failure(state, index, err),
            }
        }
    }

    /// Cap check and cursor claim happen under the outcome lock.
    fn claim(&self, state: &RunState<'_>) -> Option<usize> {
        let mut outcome = state.lock();
        if self.cap_met(outcome.matches.len()) {
            outcome.reached_cap = true;
            return None;
        }
        let index = state.cursor.fetch_add(1, Ordering::SeqCst);
        (index < state.universe.len()).then_some(index)
    }

    fn cap_met(&self, matches: usize) -> bool {
        self.batch_cap.is_some_and(|cap| matches >= cap)
    }

    fn record_row(&self, state: &RunState<'_>, index: usize, row: Row, warning: Option<String>) {
        let symbol = state.universe[index].as_str();
        let matches_filters = self.filters.passes(&row);

        let (passes, processed, matches, reached_cap) = {
            let mut outcome = state.lock();
            outcome.processed.push(row.clone());
            let passes = matches_filters && !self.cap_met(outcome.matches.len());
            if passes {
                outcome.matches.push(row.clone());
            }
            if let Some(message) = warning {
                warn!("{symbol}: {message}");
                outcome.warnings.push(ScanWarning {
                    symbol: symbol.to_string(),
                    message,
                });
            }
            if self.cap_met(outcome.matches.len()) {
                outcome.reached_cap = true;
            }
            (
                passes,
                outcome.completed(),
                outcome.matches.len(),
                outcome.reached_cap,
            )
        };

        if let Some(hook) = &self.on_item {
            hook(&ItemProgress {
                symbol,
                index,
                row: &row,
                passes,
                total: state.universe.len(),
                processed,
                matches,
                reached_cap,
            });
        }
    }

    fn record_failure(&self, state: &RunState<'_>, index: usize, error: AppError) {
        let symbol = state.universe[index].as_str();
        debug!("{symbol} failed: {error}");

        let processed = {
            let mut outcome = state.lock();
            outcome.errors.push(ScanError {
                symbol: symbol.to_string(),
                index,
                message: error.to_string(),
            });
            outcome.completed()
        };

        if let Some(hook) = &self.on_error {
            hook(&ItemFailure {
                symbol,
                index,
                error: &error,
                processed,
                total: state.universe.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn symbols(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("SYM{i:02}")).collect()
    }

    fn payload(upside: f64) -> Result<FetchedItem> {
        Ok(FetchedItem::new(json!({"sector": "Tech", "upside": upside})))
    }

    #[tokio::test]
    async fn stops_dispatch_once_cap_is_met() {
        let universe = symbols(18);
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = BatchPool::new(Filters::default())
            .concurrency(Some(3))
            .batch_cap(Some(5));

        let counter = Arc::clone(&calls);
        let outcome = pool
            .run(&universe, move |_symbol| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    payload(12.0)
                }
            })
            .await
            .expect("scan completes");

        assert!(outcome.reached_cap);
        assert_eq!(outcome.matches.len(), 5);
        assert!(outcome.processed.len() >= 5);
        assert!(outcome.processed.len() <= 18);
        assert!(calls.load(Ordering::SeqCst) < 18);
        assert_eq!(outcome.processed.len(), calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rows_finishing_after_the_cap_are_processed_but_not_accepted() {
        let universe = symbols(6);
        let first_wave = Arc::new(tokio::sync::Barrier::new(3));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let pool = BatchPool::new(Filters::default())
            .concurrency(Some(3))
            .batch_cap(Some(2))
            .on_item(move |progress| {
                sink.lock()
                    .expect("progress lock")
                    .push((progress.passes, progress.matches));
            });

        let outcome = pool
            .run(&universe, move |symbol| {
                let first_wave = Arc::clone(&first_wave);
                async move {
                    if ["SYM00", "SYM01", "SYM02"].contains(&symbol.as_str()) {
                        first_wave.wait().await;
                    }
                    payload(20.0)
                }
            })
            .await
            .expect("scan completes");

        assert!(outcome.reached_cap);
        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome.processed.len() >= 3, "processed: {}", outcome.processed.len());

        let reports = reports.lock().expect("progress lock").clone();
        assert_eq!(reports.len(), outcome.processed.len());
        assert_eq!(reports.iter().filter(|(passes, _)| *passes).count(), 2);
        assert!(reports.iter().all(|(_, matches)| *matches <= 2));
    }

    #[tokio::test]
    async fn isolates_item_failures() {
        let universe = vec!["AAA".to_string(), "BAD".to_string(), "CCC".to_string()];
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let pool = BatchPool::new(Filters::default()).on_error(move |failure| {
            assert_eq!(failure.symbol, "BAD");
            assert_eq!(failure.index, 1);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = pool
            .run(&universe, |symbol| async move {
                if symbol == "BAD" {
                    Err(AppError::message("upstream returned 500"))
                } else {
                    payload(3.0)
                }
            })
            .await
            .expect("scan completes");

        assert_eq!(outcome.processed.len(), 2);
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].symbol, "BAD");
        assert!(outcome.errors[0].message.contains("500"));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filters_decide_matches_and_report_progress() {
        let universe = vec!["LOW".to_string(), "HIGH".to_string()];
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let pool = BatchPool::new(Filters {
            min_upside: Some(10.0),
            ..Filters::default()
        })
        .on_item(move |progress| {
            sink.lock()
                .expect("progress lock")
                .push((progress.symbol.to_string(), progress.passes, progress.total));
        });

        let outcome = pool
            .run(&universe, |symbol| async move {
                payload(if symbol == "HIGH" { 25.0 } else { 2.0 })
            })
            .await
            .expect("scan completes");

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].symbol, "HIGH");
        let mut reported = reported.lock().expect("progress lock").clone();
        reported.sort();
        assert_eq!(
            reported,
            vec![("HIGH".to_string(), true, 2), ("LOW".to_string(), false, 2)]
        );
    }

    #[tokio::test]
    async fn cancellation_surfaces_once() {
        let universe = vec!["AAA".to_string(), "STOP".to_string(), "CCC".to_string()];
        let token = CancellationToken::new();
        let trigger = token.clone();
        let pool = BatchPool::new(Filters::default())
            .concurrency(Some(1))
            .cancellation(token);

        let result = pool
            .run(&universe, move |symbol| {
                let trigger = trigger.clone();
                async move {
                    if symbol == "STOP" {
                        trigger.cancel();
                        return futures::future::pending::<Result<FetchedItem>>().await;
                    }
                    payload(1.0)
                }
            })
            .await;

        let err = result.expect_err("scan is cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_fetch_errors_are_not_item_failures() {
        let universe = symbols(4);
        let pool = BatchPool::new(Filters::default()).concurrency(Some(2));

        let result = pool
            .run(&universe, |_symbol| async {
                Err(AppError::Shared(Arc::new(AppError::Cancelled)))
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn never_exceeds_concurrency() {
        let universe = symbols(20);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = BatchPool::new(Filters::default()).concurrency(Some(4));

        let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let outcome = pool
            .run(&universe, move |_symbol| {
                let (current, max) = (Arc::clone(&current), Arc::clone(&max));
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    payload(0.0)
                }
            })
            .await
            .expect("scan completes");

        assert_eq!(outcome.processed.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn empty_universe_is_a_no_op() {
        let pool = BatchPool::new(Filters::default());
        let outcome = pool
            .run(&[], |_symbol| async { payload(1.0) })
            .await
            .expect("empty scan");
        assert_eq!(outcome, ScanOutcome::default());
    }
}
