//! Fetch command - fetch one range on demand

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Args;
use std::sync::Arc;
use tracing::info;

use market_common::Interval;

use crate::config::Settings;
use crate::provider::{BinanceSource, FetchSource, MarketDataProvider};
use crate::storage::PgCandleStore;

/// Window fetched when no start is given
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Arguments for the fetch command
#[derive(Args)]
pub struct FetchArgs {
    /// Symbol (e.g., BTCUSDT or BTC/USDT)
    #[arg(long, short)]
    pub symbol: String,

    /// Interval code (1m, 5m, 1h, 4h, 1d, 1w, 1M, ...)
    #[arg(long, short)]
    pub interval: Interval,

    /// Start (RFC 3339 or YYYY-MM-DD); defaults to 30 days before end
    #[arg(long)]
    pub start: Option<String>,

    /// End (RFC 3339 or YYYY-MM-DD); defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// Always go upstream, even if the store has rows in range
    #[arg(long)]
    pub no_cache: bool,
}

/// Parse an RFC 3339 instant or a bare date (midnight UTC)
pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow!("Invalid time '{}': {}", value, e))?;
    date.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("Invalid time '{}'", value))
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, settings: &Settings) -> Result<()> {
    let end = match args.end.as_deref() {
        Some(value) => parse_time(value)?,
        None => Utc::now(),
    };
    let start = match args.start.as_deref() {
        Some(value) => parse_time(value)?,
        None => end - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };

    let store =
        PgCandleStore::from_settings(&settings.database, settings.storage.batch_insert_size)
            .await?;
    store.ensure_indexes().await?;
    let source = BinanceSource::new(&settings.binance)?;
    let provider = MarketDataProvider::new(Arc::new(store), Arc::new(source));

    info!(
        "Fetching {} {} from {} to {}...",
        args.symbol, args.interval, start, end
    );
    let outcome = provider
        .try_fetch_range(&args.symbol, args.interval, start, end, !args.no_cache)
        .await?;

    match outcome.source {
        FetchSource::CacheHit => info!("Served {} candles from the store", outcome.candles.len()),
        FetchSource::Upstream { inserted } => info!(
            "Fetched {} candles upstream, {} new",
            outcome.candles.len(),
            inserted
        ),
    }
    if let (Some(first), Some(last)) = (outcome.candles.first(), outcome.candles.last()) {
        info!(
            "  {} - {}, last close {}",
            first.open_time, last.open_time, last.close
        );
    }

    Ok(())
}
