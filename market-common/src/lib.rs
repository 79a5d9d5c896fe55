// market-common: Shared types for the candle synchronization workspace
// Used by candle-sync (collector CLI) and anything reading the candle store

pub mod data;
pub mod error;
pub mod logging;

pub use data::{Candle, CandleKey, DataError, Interval};
pub use error::{ErrorCategory, ErrorClassification};
