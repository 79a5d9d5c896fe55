//! In-memory candle store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

use market_common::{Candle, CandleKey, Interval};

use super::repository::tag_batch;
use super::{CandleStore, PairStats, RepositoryError, RepositoryResult};

/// Process-local [`CandleStore`] keyed by the natural candle key
#[derive(Default)]
pub struct InMemoryCandleStore {
    rows: RwLock<BTreeMap<CandleKey, Candle>>,
    failing_symbols: RwLock<HashSet<String>>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert for `symbol` fail as an unavailable database would
    pub fn fail_inserts_for(&self, symbol: &str) {
        self.failing_symbols.write().insert(symbol.to_string());
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of rows stored for one pair
    pub fn count(&self, symbol: &str, interval: Interval) -> usize {
        self.pair_rows(symbol, interval, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
            .len()
    }

    fn pair_rows(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Candle> {
        if from > to {
            return Vec::new();
        }
        let lower = (symbol.to_string(), interval, from);
        let upper = (symbol.to_string(), interval, to);
        self.rows
            .read()
            .range(lower..=upper)
            .map(|(_, candle)| candle.clone())
            .collect()
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn high_water_mark(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        Ok(self
            .pair_rows(symbol, interval, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
            .last()
            .map(|c| c.open_time))
    }

    async fn query(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Candle>> {
        Ok(self.pair_rows(symbol, interval, from, to))
    }

    async fn insert_batch(
        &self,
        candles: &[Candle],
        symbol: &str,
        interval: Interval,
    ) -> RepositoryResult<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        if self.failing_symbols.read().contains(symbol) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut rows = self.rows.write();
        let mut inserted = 0;
        for candle in tag_batch(candles, symbol, interval) {
            if let std::collections::btree_map::Entry::Vacant(slot) = rows.entry(candle.key()) {
                slot.insert(candle);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn latest(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> RepositoryResult<Vec<Candle>> {
        let rows = self.pair_rows(symbol, interval, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.into_iter().skip(skip).collect())
    }

    async fn pair_stats(&self) -> RepositoryResult<Vec<PairStats>> {
        let mut stats: Vec<PairStats> = Vec::new();
        for candle in self.rows.read().values() {
            match stats.last_mut() {
                Some(last) if last.symbol == candle.symbol && last.interval == candle.interval => {
                    last.row_count += 1;
                    last.latest_open = candle.open_time;
                }
                _ => stats.push(PairStats {
                    symbol: candle.symbol.clone(),
                    interval: candle.interval,
                    row_count: 1,
                    earliest_open: candle.open_time,
                    latest_open: candle.open_time,
                }),
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, interval: Interval, open_time: DateTime<Utc>) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time: open_time + chrono::Duration::minutes(59),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(3.5),
            quote_volume: dec!(360),
            trade_count: 42,
            taker_buy_volume: dec!(1.5),
            taker_buy_quote_volume: dec!(150),
        }
    }

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_high_water_mark_empty_then_set() {
        let store = InMemoryCandleStore::new();
        assert_eq!(
            store.high_water_mark("BTCUSDT", Interval::OneHour).await.unwrap(),
            None
        );

        let inserted = store
            .insert_batch(&[candle("BTCUSDT", Interval::OneHour, hour(0))], "BTCUSDT", Interval::OneHour)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(
            store.high_water_mark("BTCUSDT", Interval::OneHour).await.unwrap(),
            Some(hour(0))
        );
        assert_eq!(
            store.high_water_mark("BTCUSDT", Interval::OneDay).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_one_row() {
        let store = InMemoryCandleStore::new();
        let batch = vec![
            candle("BTCUSDT", Interval::OneHour, hour(0)),
            candle("BTCUSDT", Interval::OneHour, hour(1)),
        ];
        assert_eq!(store.insert_batch(&batch, "BTCUSDT", Interval::OneHour).await.unwrap(), 2);

        let overlapping = vec![
            candle("BTCUSDT", Interval::OneHour, hour(1)),
            candle("BTCUSDT", Interval::OneHour, hour(2)),
        ];
        assert_eq!(
            store.insert_batch(&overlapping, "BTCUSDT", Interval::OneHour).await.unwrap(),
            1
        );
        assert_eq!(store.count("BTCUSDT", Interval::OneHour), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = InMemoryCandleStore::new();
        store.fail_inserts_for("BTCUSDT");
        assert_eq!(store.insert_batch(&[], "BTCUSDT", Interval::OneHour).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_is_inclusive_and_ordered() {
        let store = InMemoryCandleStore::new();
        let batch: Vec<Candle> = [3, 0, 2, 1]
            .into_iter()
            .map(|h| candle("ETHUSDT", Interval::OneHour, hour(h)))
            .collect();
        store.insert_batch(&batch, "ETHUSDT", Interval::OneHour).await.unwrap();

        let rows = store
            .query("ETHUSDT", Interval::OneHour, hour(1), hour(2))
            .await
            .unwrap();
        let times: Vec<_> = rows.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![hour(1), hour(2)]);

        assert!(store
            .query("ETHUSDT", Interval::OneHour, hour(2), hour(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_insert_tags_pair() {
        let store = InMemoryCandleStore::new();
        store
            .insert_batch(&[candle("other", Interval::OneMinute, hour(0))], "BTCUSDT", Interval::OneHour)
            .await
            .unwrap();
        let rows = store.latest("BTCUSDT", Interval::OneHour, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BTCUSDT");
        assert_eq!(rows[0].interval, Interval::OneHour);
    }

    #[tokio::test]
    async fn test_failed_insert_writes_nothing() {
        let store = InMemoryCandleStore::new();
        store.fail_inserts_for("BTCUSDT");
        let err = store
            .insert_batch(&[candle("BTCUSDT", Interval::OneHour, hour(0))], "BTCUSDT", Interval::OneHour)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Database(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_latest_and_stats() {
        let store = InMemoryCandleStore::new();
        let batch: Vec<Candle> = (0..5)
            .map(|h| candle("BTCUSDT", Interval::OneHour, hour(h)))
            .collect();
        store.insert_batch(&batch, "BTCUSDT", Interval::OneHour).await.unwrap();
        store
            .insert_batch(&batch[..1], "ADAUSDT", Interval::OneDay)
            .await
            .unwrap();

        let latest = store.latest("BTCUSDT", Interval::OneHour, 2).await.unwrap();
        assert_eq!(
            latest.iter().map(|c| c.open_time).collect::<Vec<_>>(),
            vec![hour(3), hour(4)]
        );

        let stats = store.pair_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].symbol, "ADAUSDT");
        assert_eq!(stats[1].row_count, 5);
        assert_eq!(stats[1].earliest_open, hour(0));
        assert_eq!(stats[1].latest_open, hour(4));
    }
}
