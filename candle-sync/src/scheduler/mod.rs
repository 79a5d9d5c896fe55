//! Continuous ingestion
//!
//! Each cycle enumerates the tradable symbols, then brings every configured
//! `(symbol, interval)` pair up to date from its high-water mark. Pair failures
//! are logged and retried on the next cycle.

mod ingestion;
mod shutdown;

pub use ingestion::*;
pub use shutdown::ShutdownSignal;
