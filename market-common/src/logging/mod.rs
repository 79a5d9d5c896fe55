//! Standardized logging setup for the workspace binaries.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full tracing filter; overrides everything below
//! - `LOG_LEVEL`: level for the binary's own crates (default `info`)
//! - `LOG_FORMAT`: `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: `local` (default), `utc`, or `none`
//! - `LOG_LOCATION` / `LOG_THREAD_IDS`: `true` or `1` to enable
//!
//! # Usage
//!
//! ```rust,ignore
//! use market_common::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::for_crates(&["candle_sync", "market_common"]))?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
