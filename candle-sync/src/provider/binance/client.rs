//! Binance REST client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use market_common::{ErrorClassification, Interval};

use super::types::{BinanceApiError, ExchangeInfo};
use crate::config::BinanceSettings;
use crate::provider::normalizer::normalize_symbol;
use crate::provider::{MarketDataSource, ProviderError, ProviderResult, RawKline};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

const EXCHANGE_INFO_PATH: &str = "/api/v3/exchangeInfo";
const KLINES_PATH: &str = "/api/v3/klines";

/// Request weight of `exchangeInfo` without a symbol filter
const EXCHANGE_INFO_WEIGHT: u32 = 20;

/// Largest page the klines endpoint serves
const MAX_PAGE_LIMIT: u32 = 1000;

/// Binance spot REST source
pub struct BinanceSource {
    http: reqwest::Client,
    weight_limiter: Option<Arc<Limiter>>,
    settings: BinanceSettings,
}

impl BinanceSource {
    pub fn new(settings: &BinanceSettings) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("candle-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;

        let weight_limiter = NonZeroU32::new(settings.request_weight_per_minute)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_minute(rate))));

        Ok(Self {
            http,
            weight_limiter,
            settings: settings.clone(),
        })
    }

    fn page_limit(&self) -> u32 {
        self.settings.page_limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Wait until `weight` units of the per-minute budget are available
    async fn acquire_weight(&self, weight: u32) {
        if let Some(ref limiter) = self.weight_limiter {
            for _ in 0..weight {
                limiter.until_ready().await;
            }
        }
    }

    /// GET with retries for transient failures
    ///
    /// Rate-limit rejections are not retried here; the pair is skipped and the
    /// next cycle picks it up again.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
    ) -> ProviderResult<T> {
        let mut attempt = 0;
        loop {
            match self.get_once(path, query, weight).await {
                Ok(value) => return Ok(value),
                Err(e)
                    if e.is_transient()
                        && !matches!(e, ProviderError::RateLimit(_))
                        && attempt < self.settings.max_retries =>
                {
                    attempt += 1;
                    let delay = e.suggested_retry_delay().unwrap_or(Duration::from_millis(500));
                    warn!(
                        "GET {} failed ({}), retry {}/{} in {:?}",
                        path, e, attempt, self.settings.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        weight: u32,
    ) -> ProviderResult<T> {
        self.acquire_weight(weight).await;

        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_transport_error)?;

        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse {} response: {}", path, e)))
    }

    fn kline_query(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", self.page_limit().to_string()),
        ]
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() {
        ProviderError::Connection(e.to_string())
    } else {
        ProviderError::Request(e.to_string())
    }
}

/// Map a non-success HTTP status to an error, `None` on success
fn classify_status(status: u16, body: &str) -> Option<ProviderError> {
    if (200..300).contains(&status) {
        return None;
    }
    // 418 follows repeated 429s (IP ban)
    if status == 429 || status == 418 {
        return Some(ProviderError::RateLimit(format!("HTTP {}: {}", status, body)));
    }

    let api_error = serde_json::from_str::<BinanceApiError>(body).ok();
    let err = match (status, api_error) {
        (_, Some(api)) if api.code == BinanceApiError::INVALID_SYMBOL => {
            ProviderError::SymbolNotFound(api.msg)
        }
        (400..=499, Some(api)) => {
            ProviderError::Rejected(format!("Binance error {}: {}", api.code, api.msg))
        }
        (400..=499, None) => ProviderError::Rejected(format!("HTTP {}: {}", status, body)),
        (_, Some(api)) => ProviderError::Request(format!("Binance error {}: {}", api.code, api.msg)),
        (_, None) => ProviderError::Request(format!("HTTP {}: {}", status, body)),
    };
    Some(err)
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    async fn list_tradable_symbols(&self) -> ProviderResult<Vec<String>> {
        let info: ExchangeInfo = self
            .get_json(EXCHANGE_INFO_PATH, &[], EXCHANGE_INFO_WEIGHT)
            .await?;
        let symbols = info.tradable_symbols();
        debug!("Binance lists {} tradable symbols", symbols.len());
        Ok(symbols)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<RawKline>> {
        let symbol = normalize_symbol(symbol)?;
        let end_ms = end.timestamp_millis();
        let mut start_ms = start.timestamp_millis();
        let page_limit = self.page_limit() as usize;
        let max_pages = self.settings.max_pages_per_fetch.max(1);
        let mut rows: Vec<RawKline> = Vec::new();

        for page in 0..max_pages {
            if start_ms > end_ms {
                break;
            }
            let query = self.kline_query(&symbol, interval, start_ms, end_ms);
            let batch: Vec<RawKline> = self
                .get_json(KLINES_PATH, &query, self.settings.kline_request_weight)
                .await?;

            let fetched = batch.len();
            let Some(last_open) = batch.last().map(|k| k.open_time) else {
                break;
            };
            start_ms = last_open + 1;
            rows.extend(batch);

            if fetched < page_limit {
                break;
            }
            if page + 1 == max_pages {
                debug!(
                    "{} {}: page cap of {} reached, resuming next cycle",
                    symbol, interval, max_pages
                );
            }
        }

        Ok(rows)
    }
}
