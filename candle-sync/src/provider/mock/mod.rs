//! Mock data source for testing
//!
//! Generates deterministic klines for any requested range, records every
//! request, and can be told to fail for chosen symbols.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use market_common::Interval;

use crate::provider::{MarketDataSource, ProviderError, ProviderResult, RawKline};

/// One recorded `fetch_candles` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub symbol: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Mock data source for testing
pub struct MockSource {
    symbols: Vec<String>,
    /// Price level of generated candles
    pub base_price: Decimal,
    /// Rows returned per request at most
    pub max_rows: usize,
    failing_symbols: RwLock<HashSet<String>>,
    rate_limited_symbols: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,
    requests: Mutex<Vec<CandleRequest>>,
}

impl MockSource {
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            base_price: Decimal::from(100),
            max_rows: 1000,
            failing_symbols: RwLock::new(HashSet::new()),
            rate_limited_symbols: RwLock::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Cap rows returned per request
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Make every fetch for `symbol` time out
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing_symbols.write().insert(symbol.to_string());
    }

    pub fn recover_symbol(&self, symbol: &str) {
        self.failing_symbols.write().remove(symbol);
    }

    /// Answer every fetch for `symbol` with a rate-limit rejection
    pub fn rate_limit_symbol(&self, symbol: &str) {
        self.rate_limited_symbols.write().insert(symbol.to_string());
    }

    /// Make symbol enumeration fail
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Every `fetch_candles` call so far, in call order
    pub fn requests(&self) -> Vec<CandleRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, symbol: &str, interval: Interval) -> Vec<CandleRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.symbol == symbol && r.interval == interval)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// First bucket open at or after `t`
    fn align_up(interval: Interval, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match interval.fixed_duration() {
            Some(step) => {
                let step_ms = step.num_milliseconds();
                let ms = t.timestamp_millis();
                let aligned = ms.div_euclid(step_ms) * step_ms;
                let aligned = if aligned < ms { aligned + step_ms } else { aligned };
                DateTime::from_timestamp_millis(aligned)
            }
            None => {
                let month_start = Utc
                    .with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
                    .single()?;
                Some(if month_start < t {
                    interval.next_open(month_start)
                } else {
                    month_start
                })
            }
        }
    }

    fn generate(
        &self,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<RawKline> {
        let mut rows = Vec::new();
        let Some(mut open_time) = Self::align_up(interval, start) else {
            return rows;
        };

        while open_time <= end && rows.len() < self.max_rows {
            let next_open = interval.next_open(open_time);
            let step = Decimal::from(rows.len() as i64 % 10);
            let open = self.base_price + step;
            let close = open + Decimal::ONE;
            rows.push(RawKline {
                open_time: open_time.timestamp_millis(),
                open: open.to_string(),
                high: (close + Decimal::ONE).to_string(),
                low: (open - Decimal::ONE).to_string(),
                close: close.to_string(),
                volume: "10".to_string(),
                close_time: next_open.timestamp_millis() - 1,
                quote_volume: (open * Decimal::TEN).to_string(),
                trade_count: 100,
                taker_buy_volume: "5".to_string(),
                taker_buy_quote_volume: (open * Decimal::from(5)).to_string(),
                ignored: serde_json::Value::String("0".to_string()),
            });
            open_time = next_open;
        }
        rows
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new(["BTCUSDT", "ETHUSDT"])
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_tradable_symbols(&self) -> ProviderResult<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ProviderError::Connection("mock listing unavailable".to_string()));
        }
        Ok(self.symbols.clone())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<RawKline>> {
        self.requests.lock().push(CandleRequest {
            symbol: symbol.to_string(),
            interval,
            start,
            end,
        });

        if self.failing_symbols.read().contains(symbol) {
            return Err(ProviderError::Timeout(format!("mock timeout for {}", symbol)));
        }
        if self.rate_limited_symbols.read().contains(symbol) {
            return Err(ProviderError::RateLimit("HTTP 429 Too Many Requests".to_string()));
        }
        if !self.symbols.iter().any(|s| s == symbol) {
            return Err(ProviderError::SymbolNotFound(symbol.to_string()));
        }

        Ok(self.generate(interval, start, end))
    }
}
