//! Candle store contract and error types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use market_common::{Candle, ErrorCategory, ErrorClassification, Interval};

/// Table holding one row per candle
pub const CANDLE_TABLE: &str = "price_data";

/// Repository error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ErrorClassification for RepositoryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Database(_) => ErrorCategory::Transient,
            RepositoryError::Configuration(_) => ErrorCategory::Configuration,
            RepositoryError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            RepositoryError::Database(_) => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Row count and span for one `(symbol, interval)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStats {
    pub symbol: String,
    pub interval: Interval,
    pub row_count: u64,
    pub earliest_open: DateTime<Utc>,
    pub latest_open: DateTime<Utc>,
}

/// Persistence and lookup for candles
///
/// Implementations keep at most one row per `(symbol, interval, open_time)` and
/// write each batch atomically.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Latest `open_time` stored for the pair, `None` when it has no rows
    async fn high_water_mark(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> RepositoryResult<Option<DateTime<Utc>>>;

    /// Candles with `from <= open_time <= to`, oldest first
    async fn query(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Candle>>;

    /// Store `candles` under the given pair, skipping keys that already exist
    ///
    /// Returns the number of rows actually inserted; an empty batch is a no-op
    /// returning 0. Either every row of the batch is written or none is.
    async fn insert_batch(
        &self,
        candles: &[Candle],
        symbol: &str,
        interval: Interval,
    ) -> RepositoryResult<usize>;

    /// Most recent `limit` candles, oldest first
    async fn latest(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> RepositoryResult<Vec<Candle>>;

    /// Per-pair statistics, ordered by symbol then interval
    async fn pair_stats(&self) -> RepositoryResult<Vec<PairStats>>;
}

/// Tag every candle with the pair it is stored under
pub(crate) fn tag_batch(candles: &[Candle], symbol: &str, interval: Interval) -> Vec<Candle> {
    candles
        .iter()
        .cloned()
        .map(|c| c.with_pair(symbol, interval))
        .collect()
}
