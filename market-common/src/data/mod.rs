//! Market data types shared across crates.

mod candle;
mod interval;

pub use candle::*;
pub use interval::*;

use thiserror::Error;

/// Errors raised while interpreting market data values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataError {
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}
