//! Error classification shared by every layer of the synchronizer.
//!
//! Each crate keeps its own `thiserror` enum and implements
//! [`ErrorClassification`] for it. The upstream client decides whether to retry
//! a request from the category alone, and the ingestion loop logs the category
//! next to every failed pair.
//!
//! ```rust,ignore
//! use market_common::ErrorClassification;
//!
//! match client.fetch().await {
//!     Err(e) if e.is_transient() && attempt < max_retries => {
//!         tokio::time::sleep(e.suggested_retry_delay().unwrap_or_default()).await;
//!     }
//!     other => return other,
//! }
//! ```

mod traits;

pub use traits::{ErrorCategory, ErrorClassification};
