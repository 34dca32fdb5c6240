use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::fetch::decode::{finite_number, first_present, value_to_string};

const SECTOR_PATHS: &[&[&str]] = &[&["sector"], &["profile", "sector"]];
const PRICE_PATHS: &[&[&str]] = &[&["price"], &["quote", "price"]];
const FAIR_VALUE_PATHS: &[&[&str]] = &[
    &["fairValue"],
    &["fair_value"],
    &["valuation", "fairValue"],
];
const UPSIDE_PATHS: &[&[&str]] = &[&["upside"], &["valuation", "upside"]];
const MARKET_CAP_PATHS: &[&[&str]] = &[&["marketCap"], &["market_cap"], &["profile", "marketCap"]];
const MOMENTUM_PATHS: &[&[&str]] = &[&["momentum"], &["technicals", "momentum"]];
const SUMMARY_PATHS: &[&[&str]] = &[&["summary"], &["insight"]];

/// One screened symbol. Numeric fields only ever hold finite values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub symbol: String,
    pub sector: String,
    pub price: Option<f64>,
    pub fair_value: Option<f64>,
    /// Percent distance from price to fair value.
    pub upside: Option<f64>,
    pub market_cap: Option<f64>,
    pub momentum: Option<f64>,
    pub summary: String,
}

impl Row {
    /// Reduce an upstream payload to a row. Upside is derived from price and fair
    /// value when the payload does not carry it.
    pub fn from_payload(symbol: &str, data: &Value) -> Result<Self> {
        if !data.is_object() {
            return Err(AppError::message(format!(
                "Payload for {} is not an object",
                symbol
            )));
        }

        let number = |paths: &[&[&str]]| first_present(data, paths).and_then(finite_number);
        let text = |paths: &[&[&str]]| {
            first_present(data, paths)
                .map(value_to_string)
                .unwrap_or_default()
        };

        let price = number(PRICE_PATHS);
        let fair_value = number(FAIR_VALUE_PATHS);
        let upside = number(UPSIDE_PATHS).or_else(|| derive_upside(price, fair_value));

        Ok(Self {
            symbol: symbol.to_string(),
            sector: text(SECTOR_PATHS),
            price,
            fair_value,
            upside,
            market_cap: number(MARKET_CAP_PATHS),
            momentum: number(MOMENTUM_PATHS),
            summary: text(SUMMARY_PATHS),
        })
    }
}

fn derive_upside(price: Option<f64>, fair_value: Option<f64>) -> Option<f64> {
    let (price, fair_value) = (price?, fair_value?);
    if price <= 0.0 {
        return None;
    }
    let upside = (fair_value / price - 1.0) * 100.0;
    upside.is_finite().then_some(upside)
}
