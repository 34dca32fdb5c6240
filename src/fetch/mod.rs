use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub mod decode;
pub mod quotes;
pub mod request;

pub use quotes::IntelFetcher;
pub use request::{prepare_request, PreparedRequest};

pub type FetchResult<T> = Result<T>;

/// Raw per-symbol payload handed back by an item fetcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl FetchedItem {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Worker count for a batch of `total` items, sized to stay friendly to the upstream.
pub fn default_concurrency(total: usize) -> usize {
    match total {
        0..=5 => 1,
        6..=20 => 3,
        21..=50 => 5,
        51..=100 => 6,
        _ => 8,
    }
}

/// Clamp a requested (or heuristic) concurrency into `[1, total]`.
#[inline]
pub fn resolve_concurrency(requested: Option<usize>, total: usize) -> usize {
    let limit = requested.unwrap_or_else(|| default_concurrency(total));
    limit.clamp(1, total.max(1))
}
