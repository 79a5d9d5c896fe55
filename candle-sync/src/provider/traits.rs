//! Upstream market data capability
//!
//! [`MarketDataSource`] is what the rest of the crate needs from an exchange:
//! the tradable symbol universe and raw kline rows for a time range. The Binance
//! REST client and the mock source both implement it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use market_common::{ErrorCategory, ErrorClassification, Interval};

/// Upstream failures, classified for the retry loop
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProviderError {
    /// Could not reach the exchange
    #[error("Upstream unreachable: {0}")]
    Connection(String),

    /// Server-side or otherwise retryable HTTP failure
    #[error("Upstream request failed: {0}")]
    Request(String),

    /// 4xx the exchange will keep returning for the same request
    #[error("Upstream rejected request: {0}")]
    Rejected(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    /// Malformed kline row or payload
    #[error("Malformed upstream data: {0}")]
    Parse(String),

    /// Request weight exhausted (HTTP 429) or IP banned (HTTP 418)
    #[error("Upstream rate limited: {0}")]
    RateLimit(String),

    #[error("Unknown symbol: {0}")]
    SymbolNotFound(String),

    #[error("Upstream client misconfigured: {0}")]
    Configuration(String),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        use ProviderError::*;
        match self {
            Connection(_) | Request(_) | Timeout(_) => ErrorCategory::Transient,
            Rejected(_) | Parse(_) | SymbolNotFound(_) => ErrorCategory::Permanent,
            RateLimit(_) => ErrorCategory::ResourceExhausted,
            Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        let delay = match self {
            ProviderError::Connection(_) => Duration::from_secs(2),
            ProviderError::Timeout(_) => Duration::from_secs(1),
            ProviderError::Request(_) => Duration::from_millis(500),
            // Binance weight windows are one minute wide
            ProviderError::RateLimit(_) => Duration::from_secs(60),
            _ => return None,
        };
        Some(delay)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One upstream kline row
///
/// The wire form is a fixed-order 12-element JSON array; prices and volumes
/// arrive as decimal strings and times as millisecond epochs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawKline {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub close_time: i64,
    pub quote_volume: String,
    pub trade_count: i64,
    pub taker_buy_volume: String,
    pub taker_buy_quote_volume: String,
    /// Unused trailing field
    pub ignored: serde_json::Value,
}

/// Exchange data capability
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Symbols currently open for trading
    async fn list_tradable_symbols(&self) -> ProviderResult<Vec<String>>;

    /// Raw klines whose open time falls in `[start, end]`, oldest first
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<RawKline>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_kline_from_array() {
        let json = r#"[
            1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
            "148976.11427815", 1499644799999, "2434.19055334", 308,
            "1756.87402397", "28.46694368", "0"
        ]"#;
        let kline: RawKline = serde_json::from_str(json).unwrap();
        assert_eq!(kline.open_time, 1499040000000);
        assert_eq!(kline.close, "0.01577100");
        assert_eq!(kline.close_time, 1499644799999);
        assert_eq!(kline.trade_count, 308);
        assert_eq!(kline.taker_buy_quote_volume, "28.46694368");
    }

    #[test]
    fn test_raw_kline_rejects_short_row() {
        let json = r#"[1499040000000, "1", "2"]"#;
        assert!(serde_json::from_str::<RawKline>(json).is_err());
    }

    #[test]
    fn test_provider_error_classification() {
        assert!(ProviderError::Timeout("klines".into()).is_transient());
        assert!(ProviderError::RateLimit("429".into()).is_transient());
        assert_eq!(
            ProviderError::RateLimit("429".into()).category(),
            ErrorCategory::ResourceExhausted
        );
        assert!(ProviderError::Parse("bad".into()).is_permanent());
    }
}
