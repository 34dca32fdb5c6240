use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, Ttl};
use crate::records::history::DEFAULT_HISTORY_CAPACITY;
use crate::screen::{Filters, SortSpec};

pub mod loader;
pub mod validator;

pub use loader::load_config;

pub const DEFAULT_CONFIG_FILE: &str = "screener.json";

/// Upstream intel endpoint and how hard to retry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// URL template; `{symbol}` and `{symbol_lower}` are substituted per request.
    pub endpoint: String,
    /// Header values may reference `${ENV_VAR}`.
    pub headers: HashMap<String, String>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let headers = HashMap::from([
            ("Accept".to_string(), "application/json".to_string()),
            (
                "User-Agent".to_string(),
                concat!("stock-screener/", env!("CARGO_PKG_VERSION")).to_string(),
            ),
        ]);

        Self {
            endpoint: "http://127.0.0.1:8888/api/intel?symbol={symbol}".to_string(),
            headers,
            timeout_ms: 10_000,
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// `null` keeps entries until evicted for capacity.
    pub ttl_secs: Option<u64>,
    /// `null` disables capacity eviction.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Some(15 * 60),
            max_entries: Some(crate::cache::DEFAULT_MAX_ENTRIES),
        }
    }
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            default_ttl: match self.ttl_secs {
                Some(secs) => Ttl::After(Duration::from_secs(secs)),
                None => Ttl::Never,
            },
            max_entries: self.max_entries,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub concurrency: Option<usize>,
    pub batch_cap: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub dir: PathBuf,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("assets/history"),
            max_entries: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenerConfig {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub filters: Filters,
    pub sort: SortSpec,
    pub history: HistoryConfig,
    pub presets_dir: PathBuf,
    pub universe_file: PathBuf,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            scan: ScanConfig::default(),
            filters: Filters::default(),
            sort: SortSpec::default(),
            history: HistoryConfig::default(),
            presets_dir: PathBuf::from("assets/filters"),
            universe_file: PathBuf::from("assets/universe.csv"),
        }
    }
}
