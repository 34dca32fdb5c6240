use crate::error::{AppError, Result};
use crate::screen::Filters;

use super::{ProviderConfig, ScreenerConfig};

/// Validate the whole configuration and surface every issue at once.
pub fn validate_config(config: &ScreenerConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_provider(&config.provider, &mut issues);
    collect_filter_issues(&config.filters, &mut issues);

    if config.scan.concurrency == Some(0) {
        issues.push("scan.concurrency must be at least 1 when set".to_string());
    }
    if config.scan.batch_cap == Some(0) {
        issues.push("scan.batchCap must be at least 1 when set".to_string());
    }
    if config.history.max_entries == 0 {
        issues.push("history.maxEntries must be at least 1".to_string());
    }

    into_result("configuration invalid", issues)
}

/// Validate a filter set coming from flags, presets or config.
pub fn validate_filters(filters: &Filters) -> Result<()> {
    let mut issues = Vec::new();
    collect_filter_issues(filters, &mut issues);
    into_result("filters invalid", issues)
}

fn validate_provider(provider: &ProviderConfig, issues: &mut Vec<String>) {
    if provider.endpoint.trim().is_empty() {
        issues.push("provider.endpoint must not be empty".to_string());
    } else if !provider.endpoint.contains("{symbol") {
        issues.push(
            "provider.endpoint should reference `{symbol}` for per-symbol substitution".to_string(),
        );
    }

    if provider.timeout_ms == 0 {
        issues.push("provider.timeoutMs must be greater than zero".to_string());
    }
    if provider.max_attempts == 0 {
        issues.push("provider.maxAttempts must be at least 1".to_string());
    }
}

fn collect_filter_issues(filters: &Filters, issues: &mut Vec<String>) {
    let bounds = [
        ("minUpside", filters.min_upside),
        ("maxUpside", filters.max_upside),
        ("marketCapMin", filters.market_cap_min),
        ("marketCapMax", filters.market_cap_max),
    ];
    for (name, bound) in bounds {
        if bound.is_some_and(|value| !value.is_finite()) {
            issues.push(format!("filter `{name}` must be a finite number"));
        }
    }

    if let (Some(lower), Some(upper)) = (filters.min_upside, filters.max_upside) {
        if lower > upper {
            issues.push(format!(
                "upside range has lower bound {lower} greater than upper bound {upper}"
            ));
        }
    }
    if let (Some(lower), Some(upper)) = (filters.market_cap_min, filters.market_cap_max) {
        if lower > upper {
            issues.push(format!(
                "market cap range has lower bound {lower} greater than upper bound {upper}"
            ));
        }
    }
}

fn into_result(prefix: &str, issues: Vec<String>) -> Result<()> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{prefix}:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}
