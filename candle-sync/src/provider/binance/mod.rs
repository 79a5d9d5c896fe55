//! Binance REST data source
//!
//! Implements [`MarketDataSource`](crate::provider::MarketDataSource) over the
//! public spot REST API: `exchangeInfo` for the tradable universe and paginated
//! `klines` for candle history.

mod client;
mod types;

pub use client::BinanceSource;
pub use types::{BinanceApiError, ExchangeInfo, ExchangeSymbol};
