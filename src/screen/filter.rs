use serde::{Deserialize, Serialize};

use super::Row;

/// Numeric and sector constraints a row must satisfy to count as a match.
///
/// Bounds are inclusive. Once a bound is set the corresponding field must be present
/// and finite; missing values never pass as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_upside: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upside: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap_max: Option<f64>,
    /// Case-insensitive substrings; a row matches when its sector contains any of them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sectors: Vec<String>,
}

impl Filters {
    pub fn passes(&self, row: &Row) -> bool {
        within(row.upside, self.min_upside, self.max_upside)
            && within(row.market_cap, self.market_cap_min, self.market_cap_max)
            && self.sector_matches(&row.sector)
    }

    pub fn is_empty(&self) -> bool {
        self.min_upside.is_none()
            && self.max_upside.is_none()
            && self.market_cap_min.is_none()
            && self.market_cap_max.is_none()
            && self.active_sectors().next().is_none()
    }

    /// Drop non-finite bounds and blank sector entries.
    pub fn sanitized(&self) -> Self {
        let finite = |bound: Option<f64>| bound.filter(|value| value.is_finite());
        Self {
            min_upside: finite(self.min_upside),
            max_upside: finite(self.max_upside),
            market_cap_min: finite(self.market_cap_min),
            market_cap_max: finite(self.market_cap_max),
            sectors: self.active_sectors().map(str::to_string).collect(),
        }
    }

    /// Layer `other` on top of `self`: any bound or sector list it sets wins.
    pub fn merged_with(&self, other: &Filters) -> Self {
        Self {
            min_upside: other.min_upside.or(self.min_upside),
            max_upside: other.max_upside.or(self.max_upside),
            market_cap_min: other.market_cap_min.or(self.market_cap_min),
            market_cap_max: other.market_cap_max.or(self.market_cap_max),
            sectors: if other.sectors.is_empty() {
                self.sectors.clone()
            } else {
                other.sectors.clone()
            },
        }
    }

    fn active_sectors(&self) -> impl Iterator<Item = &str> {
        self.sectors
            .iter()
            .map(|sector| sector.trim())
            .filter(|sector| !sector.is_empty())
    }

    fn sector_matches(&self, sector: &str) -> bool {
        let mut wanted = self.active_sectors().peekable();
        if wanted.peek().is_none() {
            return true;
        }
        let sector = sector.trim().to_lowercase();
        if sector.is_empty() {
            return false;
        }
        wanted.any(|needle| sector.contains(&needle.to_lowercase()))
    }
}

fn within(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return false;
    };
    min.map_or(true, |lower| value >= lower) && max.map_or(true, |upper| value <= upper)
}
