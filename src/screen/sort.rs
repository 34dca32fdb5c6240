use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Upside,
    MarketCap,
    Momentum,
    Symbol,
}

impl SortKey {
    fn value(self, row: &Row) -> Option<f64> {
        match self {
            SortKey::Upside => row.upside,
            SortKey::MarketCap => row.market_cap,
            SortKey::Momentum => row.momentum,
            SortKey::Symbol => None,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SortKey::Upside => "upside",
            SortKey::MarketCap => "marketCap",
            SortKey::Momentum => "momentum",
            SortKey::Symbol => "symbol",
        };
        f.write_str(label)
    }
}

impl FromStr for SortKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "upside" => Ok(SortKey::Upside),
            "marketcap" | "cap" => Ok(SortKey::MarketCap),
            "momentum" => Ok(SortKey::Momentum),
            "symbol" => Ok(SortKey::Symbol),
            other => Err(AppError::validation(format!("unknown sort key `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Rows missing the sort value go last regardless of direction; ties fall back to symbol.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let primary = match self.key {
            SortKey::Symbol => self.directed(a.symbol.cmp(&b.symbol)),
            key => match (key.value(a), key.value(b)) {
                (Some(x), Some(y)) => self.directed(x.total_cmp(&y)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        primary.then_with(|| a.symbol.cmp(&b.symbol))
    }

    fn directed(&self, ordering: Ordering) -> Ordering {
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{} {}", self.key, arrow)
    }
}

pub fn sort_rows(rows: &mut [Row], spec: SortSpec) {
    rows.sort_by(|a, b| spec.compare(a, b));
}
