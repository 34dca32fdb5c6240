use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Row;

pub const MAX_SECTOR_LEADERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    pub symbol: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorLeader {
    pub name: String,
    pub count: usize,
    /// Share of all rows that belong to this sector.
    pub weight: f64,
    pub average_upside: Option<f64>,
}

/// Summary statistics over an accepted-row set.
///
/// Always recomputed from the full slice; fields over a numeric column only consider
/// rows where that column is finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregateMetrics {
    pub count: usize,
    pub upside_count: usize,
    pub avg_upside: Option<f64>,
    pub median_upside: Option<f64>,
    pub best_upside: Option<Leader>,
    pub worst_upside: Option<Leader>,
    pub best_momentum: Option<Leader>,
    pub momentum_average: Option<f64>,
    pub momentum_median: Option<f64>,
    pub total_market_cap: Option<f64>,
    pub average_market_cap: Option<f64>,
    pub positive_upside_count: usize,
    pub negative_upside_count: usize,
    pub zero_upside_count: usize,
    pub sector_leaders: Vec<SectorLeader>,
}

impl AggregateMetrics {
    pub fn compute(rows: &[Row]) -> Self {
        let upsides = finite_column(rows, |row| row.upside);
        let momenta = finite_column(rows, |row| row.momentum);
        let caps: Vec<f64> = finite_column(rows, |row| row.market_cap)
            .into_iter()
            .map(|(_, value)| value)
            .collect();

        let upside_values: Vec<f64> = upsides.iter().map(|(_, value)| *value).collect();
        let momentum_values: Vec<f64> = momenta.iter().map(|(_, value)| *value).collect();

        let total_market_cap = (!caps.is_empty()).then(|| caps.iter().sum::<f64>());

        Self {
            count: rows.len(),
            upside_count: upside_values.len(),
            avg_upside: mean(&upside_values),
            median_upside: median(&upside_values),
            best_upside: extreme(&upsides, |candidate, best| candidate > best),
            worst_upside: extreme(&upsides, |candidate, worst| candidate < worst),
            best_momentum: extreme(&momenta, |candidate, best| candidate > best),
            momentum_average: mean(&momentum_values),
            momentum_median: median(&momentum_values),
            total_market_cap,
            average_market_cap: mean(&caps),
            positive_upside_count: upside_values.iter().filter(|v| **v > 0.0).count(),
            negative_upside_count: upside_values.iter().filter(|v| **v < 0.0).count(),
            zero_upside_count: upside_values.iter().filter(|v| **v == 0.0).count(),
            sector_leaders: sector_leaders(rows),
        }
    }
}

fn finite_column<'a>(rows: &'a [Row], field: impl Fn(&Row) -> Option<f64>) -> Vec<(&'a Row, f64)> {
    rows.iter()
        .filter_map(|row| field(row).filter(|v| v.is_finite()).map(|v| (row, v)))
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Strict comparison keeps the first row on ties.
fn extreme(column: &[(&Row, f64)], better: impl Fn(f64, f64) -> bool) -> Option<Leader> {
    let mut iter = column.iter();
    let (first_row, first_value) = iter.next()?;
    let (row, value) = iter.fold((*first_row, *first_value), |current, (row, value)| {
        if better(*value, current.1) {
            (*row, *value)
        } else {
            current
        }
    });
    Some(Leader {
        symbol: row.symbol.clone(),
        value,
    })
}

fn sector_leaders(rows: &[Row]) -> Vec<SectorLeader> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut groups: BTreeMap<&str, (usize, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        let name = row.sector.trim();
        if name.is_empty() {
            continue;
        }
        let group = groups.entry(name).or_default();
        group.0 += 1;
        if let Some(upside) = row.upside.filter(|v| v.is_finite()) {
            group.1.push(upside);
        }
    }

    let total = rows.len() as f64;
    let mut leaders: Vec<SectorLeader> = groups
        .into_iter()
        .map(|(name, (count, upsides))| SectorLeader {
            name: name.to_string(),
            count,
            weight: count as f64 / total,
            average_upside: mean(&upsides),
        })
        .collect();

    leaders.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    leaders.truncate(MAX_SECTOR_LEADERS);
    leaders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(symbol: &str, sector: &str, upside: Option<f64>, momentum: Option<f64>, cap: Option<f64>) -> Row {
        Row {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            upside,
            momentum,
            market_cap: cap,
            ..Row::default()
        }
    }

    fn close(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|value| (value - expected).abs() < 1e-3)
    }

    #[test]
    fn aggregates_the_reference_rows() {
        let rows = vec![
            row("AAA", "Tech", Some(10.0), Some(5.0), Some(2e12)),
            row("BBB", "Tech", Some(-5.0), Some(2.0), Some(1.8e12)),
            row("CCC", "Fin", Some(0.0), None, Some(4e11)),
        ];

        let metrics = AggregateMetrics::compute(&rows);

        assert_eq!(metrics.count, 3);
        assert!(close(metrics.avg_upside, 1.667), "avg: {:?}", metrics.avg_upside);
        assert_eq!(metrics.median_upside, Some(0.0));
        let best = metrics.best_upside.expect("best upside");
        assert_eq!((best.symbol.as_str(), best.value), ("AAA", 10.0));
        assert_eq!(metrics.worst_upside.map(|l| l.symbol), Some("BBB".to_string()));

        let leader = &metrics.sector_leaders[0];
        assert_eq!(leader.name, "Tech");
        assert_eq!(leader.count, 2);
        assert!((leader.weight - 0.667).abs() < 1e-3);
        assert!(close(leader.average_upside, 2.5));

        assert!(close(metrics.momentum_average, 3.5));
        assert!(close(metrics.momentum_median, 3.5));
        assert!(close(metrics.total_market_cap, 4.2e12));
        assert_eq!(
            metrics.upside_count,
            metrics.positive_upside_count + metrics.negative_upside_count + metrics.zero_upside_count
        );
    }

    #[test]
    fn missing_values_are_excluded_not_zeroed() {
        let rows = vec![
            row("A", "", Some(4.0), None, None),
            row("B", "", None, None, None),
        ];
        let metrics = AggregateMetrics::compute(&rows);
        assert_eq!(metrics.avg_upside, Some(4.0));
        assert_eq!(metrics.upside_count, 1);
        assert_eq!(metrics.momentum_average, None);
        assert_eq!(metrics.best_momentum, None);
        assert_eq!(metrics.total_market_cap, None);
        assert!(metrics.sector_leaders.is_empty());
    }

    #[test]
    fn ties_keep_the_first_row() {
        let rows = vec![
            row("FIRST", "X", Some(7.0), None, None),
            row("SECOND", "X", Some(7.0), None, None),
        ];
        let metrics = AggregateMetrics::compute(&rows);
        assert_eq!(metrics.best_upside.map(|l| l.symbol), Some("FIRST".to_string()));
        assert_eq!(metrics.worst_upside.map(|l| l.symbol), Some("FIRST".to_string()));
    }

    #[test]
    fn sector_leaders_are_capped_and_ordered() {
        let sectors = ["G", "F", "E", "D", "C", "B", "A"];
        let mut rows: Vec<Row> = sectors
            .iter()
            .map(|sector| row("S", sector, None, None, None))
            .collect();
        rows.push(row("T", "F", None, None, None));

        let leaders = AggregateMetrics::compute(&rows).sector_leaders;
        let names: Vec<_> = leaders.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["F", "A", "B", "C", "D"]);
        let weight_sum: f64 = leaders.iter().map(|l| l.weight).sum();
        assert!(weight_sum <= 1.0);
    }

    #[test]
    fn empty_input_yields_default() {
        assert_eq!(AggregateMetrics::compute(&[]), AggregateMetrics::default());
    }
}
