use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::fetch::decode::{finite_number, value_to_string};
use crate::screen::{AggregateMetrics, Filters, SortSpec};
use crate::utils::now_millis;

use super::storage::FallbackStore;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;
pub const HISTORY_KEY: &str = "run-history";

const MAX_SECTORS: usize = 12;
const MAX_UNIVERSE_SAMPLE: usize = 30;
const MAX_SECTOR_LEADERS: usize = 5;

/// Metadata about one finished scan, enough to replay it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunHistoryEntry {
    /// Epoch millis; unique within the store.
    pub timestamp: i64,
    pub universe_count: usize,
    pub matches: usize,
    pub duration_ms: u64,
    pub reached_cap: bool,
    pub error_count: usize,
    pub filters: Filters,
    pub sort: SortSpec,
    pub universe_sample: Vec<String>,
    pub metrics: AggregateMetrics,
}

impl RunHistoryEntry {
    /// Clamp every collection to its bound and drop values that cannot be persisted.
    fn sanitized(mut self) -> Self {
        self.timestamp = self.timestamp.max(0);

        self.filters = self.filters.sanitized();
        self.filters.sectors.truncate(MAX_SECTORS);

        self.universe_sample = self
            .universe_sample
            .iter()
            .map(|symbol| symbol.trim().to_string())
            .filter(|symbol| !symbol.is_empty())
            .take(MAX_UNIVERSE_SAMPLE)
            .collect();

        let metrics = &mut self.metrics;
        for value in [
            &mut metrics.avg_upside,
            &mut metrics.median_upside,
            &mut metrics.momentum_average,
            &mut metrics.momentum_median,
            &mut metrics.total_market_cap,
            &mut metrics.average_market_cap,
        ] {
            *value = value.filter(|v| v.is_finite());
        }
        for leader in [
            &mut metrics.best_upside,
            &mut metrics.worst_upside,
            &mut metrics.best_momentum,
        ] {
            if leader.as_ref().is_some_and(|l| !l.value.is_finite()) {
                *leader = None;
            }
        }
        metrics.sector_leaders.truncate(MAX_SECTOR_LEADERS);
        for sector in &mut metrics.sector_leaders {
            sector.weight = finite_or_zero(sector.weight).clamp(0.0, 1.0);
            sector.average_upside = sector.average_upside.filter(|v| v.is_finite());
        }
        self
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Capacity-bounded run log persisted as one JSON array under [`HISTORY_KEY`].
///
/// Entries are kept newest first. Reads never fail: unreadable or corrupt state
/// comes back as an empty history.
pub struct RunHistoryStore {
    store: FallbackStore,
    max_entries: usize,
}

impl RunHistoryStore {
    pub fn new(store: FallbackStore, max_entries: usize) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
        }
    }

    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(FallbackStore::in_memory(), max_entries)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Store `entry`, replacing any run with the same timestamp, and return what was kept.
    pub fn record(&self, entry: RunHistoryEntry) -> RunHistoryEntry {
        let entry = entry.sanitized();
        let mut entries = self.load();
        entries.retain(|existing| existing.timestamp != entry.timestamp);
        entries.push(entry.clone());
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.max_entries);
        self.save(&entries);
        debug!(
            "recorded run {} ({} stored)",
            entry.timestamp,
            entries.len()
        );
        entry
    }

    /// Record an untyped entry, coercing numeric strings and ignoring unknown fields.
    pub fn record_value(&self, raw: &Value) -> Result<RunHistoryEntry> {
        let object = raw
            .as_object()
            .ok_or_else(|| AppError::validation("run history entry must be a JSON object"))?;
        Ok(self.record(entry_from_object(object)))
    }

    /// Newest first; callers own the returned entries.
    pub fn list(&self) -> Vec<RunHistoryEntry> {
        self.load()
    }

    pub fn find(&self, timestamp: i64) -> Option<RunHistoryEntry> {
        self.load()
            .into_iter()
            .find(|entry| entry.timestamp == timestamp)
    }

    pub fn latest(&self) -> Option<RunHistoryEntry> {
        self.load().into_iter().next()
    }

    pub fn clear(&self) {
        self.store.remove_item(HISTORY_KEY);
    }

    fn load(&self) -> Vec<RunHistoryEntry> {
        let Some(raw) = self.store.get_item(HISTORY_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<RunHistoryEntry>>(&raw) {
            Ok(mut entries) => {
                entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                entries.truncate(self.max_entries);
                entries
            }
            Err(err) => {
                warn!("ignoring unreadable run history: {err}");
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[RunHistoryEntry]) {
        match serde_json::to_string(entries) {
            Ok(json) => self.store.set_item(HISTORY_KEY, &json),
            Err(err) => warn!("failed to serialize run history: {err}"),
        }
    }
}

fn entry_from_object(object: &Map<String, Value>) -> RunHistoryEntry {
    let count = |key: &str| -> u64 {
        object
            .get(key)
            .and_then(finite_number)
            .map(|value| value.max(0.0).round() as u64)
            .unwrap_or(0)
    };
    let flag = |key: &str| match object.get(key) {
        Some(Value::Bool(value)) => *value,
        Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
        Some(other) => finite_number(other).is_some_and(|n| n != 0.0),
        None => false,
    };

    let timestamp = object
        .get("timestamp")
        .and_then(finite_number)
        .map(|value| value as i64)
        .unwrap_or_else(now_millis);

    RunHistoryEntry {
        timestamp,
        universe_count: count("universeCount") as usize,
        matches: count("matches") as usize,
        duration_ms: count("durationMs"),
        reached_cap: flag("reachedCap"),
        error_count: count("errorCount") as usize,
        filters: object.get("filters").map(filters_from_value).unwrap_or_default(),
        sort: object
            .get("sort")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default(),
        universe_sample: object
            .get("universeSample")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(value_to_string).collect())
            .unwrap_or_default(),
        metrics: object
            .get("metrics")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default(),
    }
}

fn filters_from_value(value: &Value) -> Filters {
    let bound = |key: &str| value.get(key).and_then(finite_number);
    let sectors = match value.get("sectors") {
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        Some(Value::String(text)) => text.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    Filters {
        min_upside: bound("minUpside"),
        max_upside: bound("maxUpside"),
        market_cap_min: bound("marketCapMin"),
        market_cap_max: bound("marketCapMax"),
        sectors,
    }
}
