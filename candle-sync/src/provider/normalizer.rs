//! Raw kline normalizer
//!
//! Converts upstream rows into [`Candle`] values: decimal strings become
//! `Decimal`, millisecond epochs become `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use market_common::{Candle, Interval};

use super::{ProviderError, ProviderResult, RawKline};

/// Normalize a symbol to the exchange form (`btc/usdt` → `BTCUSDT`)
pub fn normalize_symbol(symbol: &str) -> ProviderResult<String> {
    let normalized: String = symbol.trim().replace('/', "").to_uppercase();
    if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ProviderError::SymbolNotFound(format!(
            "Invalid symbol '{}'",
            symbol
        )));
    }
    Ok(normalized)
}

fn parse_decimal(field: &str, value: &str) -> ProviderResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| ProviderError::Parse(format!("Invalid {} '{}': {}", field, value, e)))
}

fn parse_millis(field: &str, millis: i64) -> ProviderResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ProviderError::Parse(format!("Invalid {} timestamp {}", field, millis)))
}

/// Normalize one raw kline for the given pair
pub fn normalize_kline(symbol: &str, interval: Interval, raw: &RawKline) -> ProviderResult<Candle> {
    let open_time = parse_millis("open_time", raw.open_time)?;
    let close_time = parse_millis("close_time", raw.close_time)?;
    if close_time < open_time {
        return Err(ProviderError::Parse(format!(
            "close_time {} precedes open_time {}",
            raw.close_time, raw.open_time
        )));
    }
    if raw.trade_count < 0 {
        return Err(ProviderError::Parse(format!(
            "Negative trade count {}",
            raw.trade_count
        )));
    }

    Ok(Candle {
        symbol: symbol.to_string(),
        interval,
        open_time,
        close_time,
        open: parse_decimal("open", &raw.open)?,
        high: parse_decimal("high", &raw.high)?,
        low: parse_decimal("low", &raw.low)?,
        close: parse_decimal("close", &raw.close)?,
        volume: parse_decimal("volume", &raw.volume)?,
        quote_volume: parse_decimal("quote_volume", &raw.quote_volume)?,
        trade_count: raw.trade_count,
        taker_buy_volume: parse_decimal("taker_buy_volume", &raw.taker_buy_volume)?,
        taker_buy_quote_volume: parse_decimal(
            "taker_buy_quote_volume",
            &raw.taker_buy_quote_volume,
        )?,
    })
}

/// Normalize a whole response; one malformed row fails the batch
pub fn normalize_klines(
    symbol: &str,
    interval: Interval,
    rows: &[RawKline],
) -> ProviderResult<Vec<Candle>> {
    rows.iter()
        .map(|raw| normalize_kline(symbol, interval, raw))
        .collect()
}
