//! Candle storage
//!
//! [`CandleStore`] is the persistence contract; [`PgCandleStore`] backs it with
//! PostgreSQL and [`InMemoryCandleStore`] with a process-local map.

mod memory;
mod postgres;
mod repository;

pub use memory::*;
pub use postgres::*;
pub use repository::*;
