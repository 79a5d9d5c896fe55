//! PostgreSQL candle store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use market_common::{Candle, Interval};

use super::repository::tag_batch;
use super::{CandleStore, PairStats, RepositoryError, RepositoryResult, CANDLE_TABLE};
use crate::config::DatabaseSettings;

/// Bind parameters per candle row
const COLUMNS_PER_ROW: usize = 13;

/// PostgreSQL caps a statement at 65535 bind parameters
const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / COLUMNS_PER_ROW;

const SELECT_COLUMNS: &str = r#"symbol, "interval", open_time, close_time, open, high, low, close,
    volume, quote_volume, trade_count, taker_buy_volume, taker_buy_quote_volume"#;

/// Candle store over a shared connection pool
#[derive(Clone)]
pub struct PgCandleStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgCandleStore {
    /// Create a store with the given connection pool
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.clamp(1, MAX_ROWS_PER_STATEMENT),
        }
    }

    /// Connect a pool from settings
    pub async fn from_settings(
        settings: &DatabaseSettings,
        batch_size: usize,
    ) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect(&settings.url)
            .await?;

        debug!("Connected to {}", settings.redacted_url());
        Ok(Self::new(pool, batch_size))
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensure the natural-key unique index that backs conflict handling
    ///
    /// Fails if the table already holds duplicate keys.
    pub async fn ensure_indexes(&self) -> RepositoryResult<()> {
        let statement = format!(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS {table}_symbol_interval_open_time_key
               ON {table} (symbol, "interval", open_time)"#,
            table = CANDLE_TABLE
        );
        sqlx::raw_sql(&statement).execute(&self.pool).await?;
        info!("Ensured unique candle key index on {}", CANDLE_TABLE);
        Ok(())
    }

    fn candle_from_row(row: &PgRow) -> RepositoryResult<Candle> {
        let interval: String = row.try_get("interval")?;
        let interval = interval
            .parse::<Interval>()
            .map_err(|e| RepositoryError::InvalidData(e.to_string()))?;

        Ok(Candle {
            symbol: row.try_get("symbol")?,
            interval,
            open_time: row.try_get("open_time")?,
            close_time: row.try_get("close_time")?,
            open: row.try_get("open")?,
            high: row.try_get("high")?,
            low: row.try_get("low")?,
            close: row.try_get("close")?,
            volume: row.try_get("volume")?,
            quote_volume: row.try_get("quote_volume")?,
            trade_count: row.try_get("trade_count")?,
            taker_buy_volume: row.try_get("taker_buy_volume")?,
            taker_buy_quote_volume: row.try_get("taker_buy_quote_volume")?,
        })
    }
}

#[async_trait]
impl CandleStore for PgCandleStore {
    async fn high_water_mark(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        let query = format!(
            r#"SELECT MAX(open_time) FROM {} WHERE symbol = $1 AND "interval" = $2"#,
            CANDLE_TABLE
        );
        let hwm: Option<DateTime<Utc>> = sqlx::query_scalar(&query)
            .bind(symbol)
            .bind(interval.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(hwm)
    }

    async fn query(
        &self,
        symbol: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Candle>> {
        let query = format!(
            r#"
            SELECT {}
            FROM {}
            WHERE symbol = $1 AND "interval" = $2
              AND open_time >= $3 AND open_time <= $4
            ORDER BY open_time ASC
            "#,
            SELECT_COLUMNS, CANDLE_TABLE
        );
        let rows = sqlx::query(&query)
            .bind(symbol)
            .bind(interval.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::candle_from_row).collect()
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

        let tagged = tag_batch(candles, symbol, interval);
        let mut tx = self.pool.begin().await?;
        let mut total_inserted = 0;

        // Process in chunks, committed together
        for chunk in tagged.chunks(self.batch_size) {
            let mut builder = QueryBuilder::<Postgres>::new(format!(
                r#"INSERT INTO {} (symbol, "interval", open_time, close_time, open, high, low,
                    close, volume, quote_volume, trade_count, taker_buy_volume,
                    taker_buy_quote_volume) "#,
                CANDLE_TABLE
            ));
            builder.push_values(chunk, |mut row, candle| {
                row.push_bind(candle.symbol.clone())
                    .push_bind(candle.interval.as_str())
                    .push_bind(candle.open_time)
                    .push_bind(candle.close_time)
                    .push_bind(candle.open)
                    .push_bind(candle.high)
                    .push_bind(candle.low)
                    .push_bind(candle.close)
                    .push_bind(candle.volume)
                    .push_bind(candle.quote_volume)
                    .push_bind(candle.trade_count)
                    .push_bind(candle.taker_buy_volume)
                    .push_bind(candle.taker_buy_quote_volume);
            });
            builder.push(r#" ON CONFLICT (symbol, "interval", open_time) DO NOTHING"#);

            let result = builder.build().execute(&mut *tx).await?;
            total_inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!(
            "Inserted {} of {} candles for {} {}",
            total_inserted,
            tagged.len(),
            symbol,
            interval
        );
        Ok(total_inserted)
    }

    async fn latest(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> RepositoryResult<Vec<Candle>> {
        let query = format!(
            r#"
            SELECT {}
            FROM {}
            WHERE symbol = $1 AND "interval" = $2
            ORDER BY open_time DESC
            LIMIT $3
            "#,
            SELECT_COLUMNS, CANDLE_TABLE
        );
        let rows = sqlx::query(&query)
            .bind(symbol)
            .bind(interval.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let mut candles = rows
            .iter()
            .map(Self::candle_from_row)
            .collect::<RepositoryResult<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    async fn pair_stats(&self) -> RepositoryResult<Vec<PairStats>> {
        let query = format!(
            r#"
            SELECT symbol, "interval",
                   COUNT(*) AS row_count,
                   MIN(open_time) AS earliest_open,
                   MAX(open_time) AS latest_open
            FROM {}
            GROUP BY symbol, "interval"
            "#,
            CANDLE_TABLE
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut stats = rows
            .iter()
            .map(|row| -> RepositoryResult<PairStats> {
                let interval: String = row.try_get("interval")?;
                Ok(PairStats {
                    symbol: row.try_get("symbol")?,
                    interval: interval
                        .parse()
                        .map_err(|e: market_common::DataError| {
                            RepositoryError::InvalidData(e.to_string())
                        })?,
                    row_count: row.try_get::<i64, _>("row_count")? as u64,
                    earliest_open: row.try_get("earliest_open")?,
                    latest_open: row.try_get("latest_open")?,
                })
            })
            .collect::<RepositoryResult<Vec<_>>>()?;

        stats.sort_by(|a, b| (&a.symbol, a.interval).cmp(&(&b.symbol, b.interval)));
        Ok(stats)
    }
}
