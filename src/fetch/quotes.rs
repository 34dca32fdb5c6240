use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;

use crate::cache::RequestCache;
use crate::config::ProviderConfig;
use crate::error::{AppError, Context};

use super::request::{prepare_request, PreparedRequest};
use super::{FetchResult, FetchedItem};

/// HTTP item fetcher; every call goes through the request cache so repeated or
/// concurrent lookups for the same symbol hit the upstream once per TTL.
pub struct IntelFetcher {
    client: Client,
    provider: ProviderConfig,
    cache: RequestCache<FetchedItem>,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

impl IntelFetcher {
    pub fn new(provider: ProviderConfig, cache: RequestCache<FetchedItem>) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(provider.timeout_ms))
            .build()
            .context("Failed to construct HTTP client")?;

        Ok(Self {
            client,
            provider,
            cache,
        })
    }

    pub fn cache(&self) -> &RequestCache<FetchedItem> {
        &self.cache
    }

    pub async fn fetch_item(&self, symbol: &str) -> FetchResult<FetchedItem> {
        let prepared = prepare_request(&self.provider, symbol)?;
        let key = prepared.cache_key();
        let client = self.client.clone();
        let policy = RetryPolicy {
            max_attempts: self.provider.max_attempts.max(1),
            backoff: Duration::from_millis(self.provider.backoff_ms),
        };
        let symbol = symbol.to_string();

        self.cache
            .resolve(&key, move || async move {
                fetch_remote(&client, &prepared, &symbol, policy).await
            })
            .await
            .map_err(AppError::Shared)
    }
}

async fn fetch_remote(
    client: &Client,
    prepared: &PreparedRequest,
    symbol: &str,
    policy: RetryPolicy,
) -> FetchResult<FetchedItem> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("requesting intel for {} (attempt {})", symbol, attempt);

        match client
            .get(&prepared.url)
            .headers(prepared.headers.clone())
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status.is_redirection() {
                    return Err(AppError::message(format!(
                        "Request for {} was redirected",
                        symbol
                    )));
                }

                if status == StatusCode::FORBIDDEN {
                    return Err(AppError::message(format!(
                        "Request for {} was rejected by the upstream",
                        symbol
                    )));
                }

                if status.is_success() {
                    let text = response.text().await?;
                    return parse_payload(symbol, &text);
                }

                if attempt >= policy.max_attempts {
                    return Err(AppError::message(format!(
                        "Request for {} failed with status {}",
                        symbol, status
                    )));
                }
                warn!("intel request for {} returned {}; retrying", symbol, status);
            }
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(AppError::message(format!(
                        "Failed to fetch {} after {} attempts: {}",
                        symbol, attempt, err
                    )));
                }
                warn!("intel request for {} failed: {}; retrying", symbol, err);
            }
        }

        sleep(policy.delay(attempt)).await;
    }
}

/// Accept either a `{data, warning}` envelope or a bare object.
pub fn parse_payload(symbol: &str, text: &str) -> FetchResult<FetchedItem> {
    let json: Value = serde_json::from_str(text)
        .with_context(|| format!("Failed to parse intel payload for {}", symbol))?;

    if let Some(message) = json.get("error").and_then(Value::as_str) {
        return Err(AppError::message(format!(
            "Upstream reported an error for {}: {}",
            symbol, message
        )));
    }

    match json {
        Value::Object(mut envelope) if envelope.contains_key("data") => {
            let warning = envelope
                .get("warning")
                .and_then(Value::as_str)
                .map(str::to_string);
            let data = envelope.remove("data").unwrap_or(Value::Null);
            Ok(FetchedItem { data, warning })
        }
        bare @ Value::Object(_) => Ok(FetchedItem::new(bare)),
        _ => Err(AppError::message(format!(
            "Unexpected payload shape for {}",
            symbol
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use serde_json::json;

    #[test]
    fn unwraps_envelope_and_warning() {
        let item = parse_payload(
            "AAPL",
            r#"{"data":{"price":190.5},"warning":"stale fundamentals"}"#,
        )
        .expect("envelope parses");
        assert_eq!(item.data, json!({"price": 190.5}));
        assert_eq!(item.warning.as_deref(), Some("stale fundamentals"));
    }

    #[test]
    fn accepts_bare_object_and_rejects_scalars() {
        let item = parse_payload("MSFT", r#"{"price":410}"#).expect("bare object");
        assert_eq!(item.data, json!({"price": 410}));
        assert!(item.warning.is_none());

        assert!(parse_payload("MSFT", "42").is_err());
        assert!(parse_payload("MSFT", "not json").is_err());
        assert!(parse_payload("MSFT", r#"{"error":"rate limited"}"#).is_err());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn cached_item_skips_the_network() {
        let provider = ProviderConfig {
            endpoint: "http://127.0.0.1:9/intel/{symbol}".to_string(),
            max_attempts: 1,
            ..ProviderConfig::default()
        };
        let cache = RequestCache::new(CacheOptions::default());
        let key = prepare_request(&provider, "AAPL")
            .expect("prepare")
            .cache_key();
        cache.set(&key, FetchedItem::new(json!({"price": 1.0})));

        let fetcher = IntelFetcher::new(provider, cache).expect("fetcher builds");
        let item = fetcher.fetch_item("AAPL").await.expect("served from cache");
        assert_eq!(item.data, json!({"price": 1.0}));
        assert_eq!(fetcher.cache().stats().loads, 0);
    }
}
