//! OHLCV candle

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Interval;

/// Natural key of a candle: `(symbol, interval, open_time)`
pub type CandleKey = (String, Interval, DateTime<Utc>);

/// One open-high-low-close-volume observation for a fixed time bucket
///
/// Two candles with the same [`CandleKey`] describe the same observation; stores
/// keep at most one row per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    /// Start of the bucket
    pub open_time: DateTime<Utc>,
    /// End of the bucket (exchange reports the last millisecond)
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Base asset volume
    pub volume: Decimal,
    /// Quote asset volume
    pub quote_volume: Decimal,
    pub trade_count: i64,
    pub taker_buy_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        (self.symbol.clone(), self.interval, self.open_time)
    }

    /// Re-tag the candle with the pair it is being stored under
    pub fn with_pair(mut self, symbol: &str, interval: Interval) -> Self {
        if self.symbol != symbol {
            self.symbol = symbol.to_string();
        }
        self.interval = interval;
        self
    }
}
