use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use signal_core::{Bar, PriceSource, Quota, RateLimiter, SignalError, Symbol};
use tokio::time::Instant;

/// Configuration for the OHLCV HTTP source.
#[derive(Debug, Clone)]
pub struct PriceSourceConfig {
    pub base_url: String,
    pub api_key: String,
    /// Sustained request budget per minute.
    pub requests_per_minute: f64,
    /// Per-call timeout; clamped to a 10s floor so aggressive scan modes
    /// cannot starve in-flight requests.
    pub timeout: Duration,
}

impl PriceSourceConfig {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            requests_per_minute: 300.0,
            timeout: Duration::from_secs(10),
        }
    }
}

const MIN_TIMEOUT: Duration = Duration::from_secs(10);
const RATE_SOURCE: &str = "price-api";

/// HTTP bar source: daily and 1-minute aggregates behind the shared rate
/// limiter, with automatic 429 retry.
pub struct HttpPriceSource {
    config: PriceSourceConfig,
    client: Client,
    rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateBar>,
}

#[derive(Debug, Deserialize)]
struct AggregateBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl HttpPriceSource {
    pub fn new(config: PriceSourceConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        let timeout = config.timeout.max(MIN_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            client,
            rate_limiter,
        }
    }

    /// Register this source's quota on the shared limiter.
    pub async fn register_quota(&self) {
        self.rate_limiter
            .register(RATE_SOURCE, Quota::per_minute(self.config.requests_per_minute))
            .await;
    }

    async fn fetch_aggregates(
        &self,
        symbol: &Symbol,
        timespan: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/{}/{}/{}",
            self.config.base_url,
            symbol,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
        );

        for attempt in 0..3u32 {
            let deadline = Instant::now() + Duration::from_secs(30);
            self.rate_limiter
                .acquire_until(RATE_SOURCE, deadline)
                .await?;

            let response = self
                .client
                .get(&url)
                .query(&[("apiKey", self.config.api_key.as_str()), ("adjusted", "true")])
                .send()
                .await
                .map_err(|e| SignalError::Network(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 429 {
                let wait_secs = 5u64 << attempt;
                tracing::warn!(
                    "Price source 429 for {}, waiting {}s before retry {}/3",
                    symbol,
                    wait_secs,
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }
            if status.as_u16() == 404 {
                return Err(SignalError::SymbolUnknown(symbol.to_string()));
            }
            if !status.is_success() {
                return Err(SignalError::Network(format!(
                    "HTTP {}: {}",
                    status,
                    response.text().await.unwrap_or_default()
                )));
            }

            let payload: AggregateResponse = response
                .json()
                .await
                .map_err(|e| SignalError::Network(e.to_string()))?;

            if payload.results.is_empty() {
                return Err(SignalError::Empty(format!(
                    "no {} bars for {} in range",
                    timespan, symbol
                )));
            }

            let mut bars: Vec<Bar> = payload
                .results
                .into_iter()
                .filter_map(|r| {
                    DateTime::from_timestamp_millis(r.t).map(|ts| Bar {
                        symbol: symbol.clone(),
                        ts,
                        open: r.o,
                        high: r.h,
                        low: r.l,
                        close: r.c,
                        volume: r.v,
                    })
                })
                .collect();
            bars.sort_by_key(|b| b.ts);
            bars.dedup_by_key(|b| b.ts);
            return Ok(bars);
        }

        Err(SignalError::RateLimited(format!(
            "price source rate limited after 3 retries for {}",
            symbol
        )))
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_daily(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError> {
        self.fetch_aggregates(symbol, "day", from, to).await
    }

    async fn fetch_intraday(
        &self,
        symbol: &Symbol,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SignalError> {
        self.fetch_aggregates(symbol, "minute", from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_floor() {
        let mut config = PriceSourceConfig::new("http://x".into(), "k".into());
        config.timeout = Duration::from_secs(1);
        let limiter = Arc::new(RateLimiter::new(Quota::per_minute(60.0)));
        // Construction clamps to the 10s floor without error
        let _source = HttpPriceSource::new(config, limiter);
    }

    #[test]
    fn test_aggregate_payload_parses() {
        let raw = r#"{"results":[{"t":1717372800000,"o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":100.0}]}"#;
        let payload: AggregateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.results.len(), 1);
        assert_eq!(payload.results[0].c, 1.5);
    }

    #[test]
    fn test_empty_payload_defaults() {
        let payload: AggregateResponse = serde_json::from_str("{}").unwrap();
        assert!(payload.results.is_empty());
    }
}
