//! Market data providers
//!
//! - [`MarketDataSource`]: upstream exchange capability (Binance REST, mock)
//! - [`normalizer`]: raw kline rows to [`Candle`](market_common::Candle)
//! - [`MarketDataProvider`]: read-through range fetches over a candle store

pub mod binance;
pub mod mock;
pub mod normalizer;

mod market_data;
mod traits;

pub use binance::BinanceSource;
pub use market_data::{FetchError, FetchOutcome, FetchSource, MarketDataProvider};
pub use mock::{CandleRequest, MockSource};
pub use traits::*;
