//! Read-through candle provider
//!
//! Sits between the upstream [`MarketDataSource`] and the [`CandleStore`]: a range
//! request is answered from the store when it already holds rows for it,
//! otherwise the range is fetched upstream, normalized, and written back.
//!
//! The cache check is deliberately coarse: any stored row inside the requested
//! range counts as a hit and no upstream call is made, even if the range is only
//! partly covered. The ingestion loop never relies on it for completeness; it
//! always requests the gap after the high-water mark.
//!
//! Only closed candles are persisted and returned from an upstream fetch.

use chrono::{DateTime, Months, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use market_common::{Candle, ErrorCategory, ErrorClassification, Interval};

use super::normalizer::{normalize_klines, normalize_symbol};
use super::{MarketDataSource, ProviderError};
use crate::storage::{CandleStore, RepositoryError};

/// Largest window `latest` asks upstream for, in buckets
const LATEST_MAX_LIMIT: usize = 1000;

/// Range fetch errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl ErrorClassification for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Upstream(e) => e.category(),
            FetchError::Storage(e) => e.category(),
            FetchError::InvalidRange { .. } => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<std::time::Duration> {
        match self {
            FetchError::Upstream(e) => e.suggested_retry_delay(),
            FetchError::Storage(e) => e.suggested_retry_delay(),
            FetchError::InvalidRange { .. } => None,
        }
    }
}

/// Where a range was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    CacheHit,
    /// Fetched upstream; `inserted` rows were new to the store
    Upstream { inserted: usize },
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub candles: Vec<Candle>,
    pub source: FetchSource,
}

impl FetchOutcome {
    pub fn inserted(&self) -> usize {
        match self.source {
            FetchSource::CacheHit => 0,
            FetchSource::Upstream { inserted } => inserted,
        }
    }
}

/// Read-through provider over a store and an upstream source
#[derive(Clone)]
pub struct MarketDataProvider {
    store: Arc<dyn CandleStore>,
    source: Arc<dyn MarketDataSource>,
}

impl MarketDataProvider {
    pub fn new(store: Arc<dyn CandleStore>, source: Arc<dyn MarketDataSource>) -> Self {
        Self { store, source }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Fetch `[start, end]`, reporting where the data came from
    ///
    /// Upstream and storage failures are returned to the caller. A batch that
    /// fails to persist leaves the store untouched.
    pub async fn try_fetch_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_cache: bool,
    ) -> Result<FetchOutcome, FetchError> {
        if start > end {
            return Err(FetchError::InvalidRange { start, end });
        }
        let symbol = normalize_symbol(symbol)?;

        if use_cache {
            let cached = self.store.query(&symbol, interval, start, end).await?;
            if !cached.is_empty() {
                info!(
                    symbol = %symbol,
                    interval = %interval,
                    rows = cached.len(),
                    "Cache hit"
                );
                return Ok(FetchOutcome {
                    candles: cached,
                    source: FetchSource::CacheHit,
                });
            }
            debug!(symbol = %symbol, interval = %interval, "Cache miss");
        }

        let raw = self
            .source
            .fetch_candles(&symbol, interval, start, end)
            .await?;
        let mut candles = normalize_klines(&symbol, interval, &raw)?;

        // Stored candles are never updated, so the still-forming bucket stays out
        let now = Utc::now();
        let fetched = candles.len();
        candles.retain(|c| c.close_time < now);
        if candles.len() < fetched {
            debug!(symbol = %symbol, interval = %interval, "Dropped unclosed candle");
        }

        let inserted = self.store.insert_batch(&candles, &symbol, interval).await?;

        info!(
            symbol = %symbol,
            interval = %interval,
            source = self.source.name(),
            fetched = candles.len(),
            inserted,
            "Fetched candles upstream"
        );
        Ok(FetchOutcome {
            candles,
            source: FetchSource::Upstream { inserted },
        })
    }

    /// Fetch `[start, end]`; failures are logged and yield an empty result
    ///
    /// Suited to callers iterating over many symbols that must carry on past a
    /// single failure.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_cache: bool,
    ) -> Vec<Candle> {
        match self
            .try_fetch_range(symbol, interval, start, end, use_cache)
            .await
        {
            Ok(outcome) => outcome.candles,
            Err(e) => {
                warn!(
                    symbol = %symbol,
                    interval = %interval,
                    category = %e.category(),
                    "Fetch failed: {}", e
                );
                Vec::new()
            }
        }
    }

    /// The `limit` candles opening at or before `end` (default now), straight
    /// from upstream and not cached
    pub async fn latest(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, FetchError> {
        let symbol = normalize_symbol(symbol)?;
        let end = end.unwrap_or_else(Utc::now);
        let span = limit.clamp(1, LATEST_MAX_LIMIT) as u32;
        let start = match interval.fixed_duration() {
            Some(step) => end - step * span as i32,
            None => end
                .checked_sub_months(Months::new(span))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };

        let raw = self
            .source
            .fetch_candles(&symbol, interval, start, end)
            .await?;
        let mut candles = normalize_klines(&symbol, interval, &raw)?;
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);
        Ok(candles)
    }

    /// Fetch the same range for several intervals
    ///
    /// Intervals that come back empty are logged and left out of the map.
    pub async fn fetch_multi_interval(
        &self,
        symbol: &str,
        intervals: &[Interval],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_cache: bool,
    ) -> BTreeMap<Interval, Vec<Candle>> {
        let mut by_interval = BTreeMap::new();
        for &interval in intervals {
            let candles = self
                .fetch_range(symbol, interval, start, end, use_cache)
                .await;
            if candles.is_empty() {
                warn!(symbol = %symbol, interval = %interval, "No candles for interval");
                continue;
            }
            by_interval.insert(interval, candles);
        }
        by_interval
    }
}
