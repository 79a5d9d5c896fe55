//! # Candle Sync
//!
//! Incremental exchange candlestick synchronization into PostgreSQL.
//!
//! ## Features
//!
//! - **Additive migrations**: a declarative `CREATE TABLE IF NOT EXISTS` script is
//!   reconciled against the live catalog; missing tables and columns are added,
//!   nothing is dropped
//! - **Resumable ingestion**: every `(symbol, interval)` pair resumes from its
//!   high-water mark, so only the gap is fetched
//! - **Idempotent storage**: candles are keyed by `(symbol, interval, open_time)`
//!   and batches are written atomically
//! - **Failure isolation**: one failing pair never stops the rest of a cycle
//!
//! ## Architecture
//!
//! The scheduler asks the store for each pair's cursor, the read-through
//! provider fetches the gap from the upstream source (Binance REST), and the
//! candle store persists it. Each layer sits behind a trait so tests run on an
//! in-memory store and a mock source.

pub mod cli;
pub mod config;
pub mod provider;
pub mod scheduler;
pub mod schema;
pub mod storage;

// Re-export commonly used types
pub use config::Settings;
pub use provider::{
    BinanceSource, FetchError, FetchOutcome, FetchSource, MarketDataProvider, MarketDataSource,
    MockSource, ProviderError, ProviderResult, RawKline,
};
pub use scheduler::{CycleReport, IngestError, IngestionScheduler, PairOutcome, ShutdownSignal};
pub use schema::{SchemaModel, SchemaSynchronizer, SyncMode, SyncReport};
pub use storage::{CandleStore, InMemoryCandleStore, PgCandleStore, RepositoryError};
