//! Ingestion scheduler

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use market_common::{ErrorCategory, ErrorClassification, Interval};

use super::ShutdownSignal;
use crate::config::CollectorSettings;
use crate::provider::normalizer::normalize_symbol;
use crate::provider::{FetchError, MarketDataProvider, MarketDataSource, ProviderError};
use crate::storage::{CandleStore, RepositoryError};

/// Per-pair ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Symbol enumeration failed: {0}")]
    Enumerate(#[source] ProviderError),

    #[error("{symbol} {interval} exceeded {timeout:?}")]
    Timeout {
        symbol: String,
        interval: Interval,
        timeout: Duration,
    },

    #[error("Pair task aborted: {0}")]
    Task(String),
}

impl ErrorClassification for IngestError {
    fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Fetch(e) => e.category(),
            IngestError::Storage(e) => e.category(),
            IngestError::Enumerate(e) => e.category(),
            IngestError::Timeout { .. } => ErrorCategory::Transient,
            IngestError::Task(_) => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            IngestError::Fetch(e) => e.suggested_retry_delay(),
            IngestError::Storage(e) => e.suggested_retry_delay(),
            IngestError::Enumerate(e) => e.suggested_retry_delay(),
            IngestError::Timeout { .. } => Some(Duration::from_secs(1)),
            IngestError::Task(_) => None,
        }
    }
}

/// Result of bringing one pair up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// The gap was fetched; `inserted` rows were new
    Synced { fetched: usize, inserted: usize },
    /// The next bucket has not opened yet
    UpToDate,
}

/// Summary of one scheduling cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub symbols: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub inserted: usize,
    /// Symbol enumeration failed, no pair was attempted
    pub enumeration_failed: bool,
    /// Shutdown stopped dispatch before every pair was attempted
    pub interrupted: bool,
}

impl CycleReport {
    fn record(&mut self, symbol: &str, interval: Interval, result: Result<PairOutcome, IngestError>) {
        match result {
            Ok(PairOutcome::Synced { inserted, .. }) => {
                self.succeeded += 1;
                self.inserted += inserted;
            }
            Ok(PairOutcome::UpToDate) => {
                self.succeeded += 1;
                self.up_to_date += 1;
            }
            Err(e) => {
                self.failed += 1;
                warn!(
                    symbol = %symbol,
                    interval = %interval,
                    category = %e.category(),
                    "Pair sync failed: {}", e
                );
            }
        }
    }
}

/// One async lock per `(symbol, interval)` pair
#[derive(Clone, Default)]
pub struct PairLocks {
    locks: Arc<DashMap<(String, Interval), Arc<Mutex<()>>>>,
}

impl PairLocks {
    pub fn lock_for(&self, symbol: &str, interval: Interval) -> Arc<Mutex<()>> {
        self.locks
            .entry((symbol.to_string(), interval))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Dispatch pause shared between a cycle and its pair tasks
///
/// A pair failing with a resource-exhausted error (rate limit, IP ban) holds
/// back every later dispatch of the cycle for the error's suggested delay.
#[derive(Clone, Default)]
struct DispatchBackoff {
    until: Arc<parking_lot::Mutex<Option<tokio::time::Instant>>>,
}

impl DispatchBackoff {
    fn observe(&self, error: &IngestError) {
        if error.category() != ErrorCategory::ResourceExhausted {
            return;
        }
        let Some(delay) = error.suggested_retry_delay() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + delay;
        let mut until = self.until.lock();
        if until.map_or(true, |current| current < deadline) {
            *until = Some(deadline);
        }
    }

    fn pending(&self) -> Option<tokio::time::Instant> {
        let deadline = (*self.until.lock())?;
        (deadline > tokio::time::Instant::now()).then_some(deadline)
    }
}

/// Drives incremental synchronization of every configured pair
///
/// Cheap to clone; clones share the store, source, and pair locks.
#[derive(Clone)]
pub struct IngestionScheduler {
    store: Arc<dyn CandleStore>,
    source: Arc<dyn MarketDataSource>,
    provider: MarketDataProvider,
    settings: Arc<CollectorSettings>,
    locks: PairLocks,
}

impl IngestionScheduler {
    pub fn new(
        store: Arc<dyn CandleStore>,
        source: Arc<dyn MarketDataSource>,
        settings: CollectorSettings,
    ) -> Self {
        let provider = MarketDataProvider::new(store.clone(), source.clone());
        Self {
            store,
            source,
            provider,
            settings: Arc::new(settings),
            locks: PairLocks::default(),
        }
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Tradable symbols, restricted to the configured allow-list if any
    pub async fn enumerate_symbols(&self) -> Result<Vec<String>, IngestError> {
        let tradable = self
            .source
            .list_tradable_symbols()
            .await
            .map_err(IngestError::Enumerate)?;

        if self.settings.symbols.is_empty() {
            return Ok(tradable);
        }

        let allowed: HashSet<String> = self
            .settings
            .symbols
            .iter()
            .filter_map(|s| match normalize_symbol(s) {
                Ok(symbol) => Some(symbol),
                Err(e) => {
                    warn!("Ignoring configured symbol: {}", e);
                    None
                }
            })
            .collect();

        let selected: Vec<String> = tradable
            .into_iter()
            .filter(|s| allowed.contains(s))
            .collect();
        if selected.len() < allowed.len() {
            let missing: Vec<&String> = allowed.iter().filter(|s| !selected.contains(s)).collect();
            warn!("Configured symbols not tradable upstream: {:?}", missing);
        }
        Ok(selected)
    }

    /// First open time that still needs fetching for the pair
    ///
    /// The bucket after the high-water mark, or the configured epoch start when
    /// the pair has no rows.
    pub async fn resolve_cursor(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<DateTime<Utc>, IngestError> {
        let cursor = match self.store.high_water_mark(symbol, interval).await? {
            Some(hwm) => interval.next_open(hwm),
            None => self.settings.epoch_start,
        };
        Ok(cursor)
    }

    /// Bring one pair up to date
    ///
    /// Runs under the pair's lock, so concurrent calls for the same pair are
    /// serialized, and is bounded by the configured pair timeout.
    pub async fn sync_pair(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<PairOutcome, IngestError> {
        let timeout = self.settings.pair_timeout();
        let lock = self.locks.lock_for(symbol, interval);

        let work = async {
            let _guard = lock.lock().await;
            self.sync_pair_locked(symbol, interval).await
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| IngestError::Timeout {
                symbol: symbol.to_string(),
                interval,
                timeout,
            })?
    }

    async fn sync_pair_locked(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<PairOutcome, IngestError> {
        let start = self.resolve_cursor(symbol, interval).await?;
        let now = Utc::now();
        if start > now {
            debug!(symbol = %symbol, interval = %interval, "Up to date");
            return Ok(PairOutcome::UpToDate);
        }

        let outcome = self
            .provider
            .try_fetch_range(symbol, interval, start, now, self.settings.use_cache)
            .await?;

        Ok(PairOutcome::Synced {
            fetched: outcome.candles.len(),
            inserted: outcome.inserted(),
        })
    }

    /// Run one full cycle over every `(symbol, interval)` pair
    ///
    /// Stops dispatching new pairs once shutdown is signalled; pairs already in
    /// flight run to completion.
    pub async fn run_cycle(&self, shutdown: &mut ShutdownSignal) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let symbols = match self.enumerate_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                error!("Skipping cycle: {}", e);
                report.enumeration_failed = true;
                return report;
            }
        };
        report.symbols = symbols.len();

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_pairs.max(1)));
        let pair_delay = self.settings.pair_delay();
        let mut tasks = JoinSet::new();

        let backoff = DispatchBackoff::default();
        let mut pairs: Vec<(String, Interval)> =
            Vec::with_capacity(symbols.len() * self.settings.intervals.len());
        for symbol in &symbols {
            for interval in &self.settings.intervals {
                pairs.push((symbol.clone(), *interval));
            }
        }

        for (index, (symbol, interval)) in pairs.into_iter().enumerate() {
            if shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            if index > 0 && !pair_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pair_delay) => {}
                    _ = shutdown.recv() => {
                        report.interrupted = true;
                        break;
                    }
                }
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => {
                    report.interrupted = true;
                    break;
                }
            };

            if let Some(deadline) = backoff.pending() {
                warn!(
                    pause_ms = deadline
                        .saturating_duration_since(tokio::time::Instant::now())
                        .as_millis() as u64,
                    "Upstream rate limited; pausing dispatch"
                );
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.recv() => {
                        report.interrupted = true;
                        break;
                    }
                }
            }

            let scheduler = self.clone();
            let backoff = backoff.clone();
            report.attempted += 1;
            tasks.spawn(async move {
                let _permit = permit;
                let result = scheduler.sync_pair(&symbol, interval).await;
                if let Err(e) = &result {
                    backoff.observe(e);
                }
                (symbol, interval, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((symbol, interval, result)) => report.record(&symbol, interval, result),
                Err(e) => {
                    report.failed += 1;
                    error!("{}", IngestError::Task(e.to_string()));
                }
            }
        }

        info!(
            symbols = report.symbols,
            attempted = report.attempted,
            succeeded = report.succeeded,
            up_to_date = report.up_to_date,
            failed = report.failed,
            inserted = report.inserted,
            interrupted = report.interrupted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion cycle finished"
        );
        report
    }

    /// Run cycles until shutdown, pausing `cycle_delay` between them
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(
            source = self.provider.source_name(),
            intervals = self.settings.intervals.len(),
            "Starting ingestion scheduler"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            debug!("Starting cycle {}", cycle);
            self.run_cycle(&mut shutdown).await;

            if shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.cycle_delay()) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Ingestion scheduler stopped after {} cycles", cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockSource;
    use crate::storage::InMemoryCandleStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn settings() -> CollectorSettings {
        CollectorSettings {
            intervals: vec![Interval::OneHour],
            symbols: Vec::new(),
            epoch_start: Utc::now() - ChronoDuration::hours(6),
            pair_delay_ms: 0,
            cycle_delay_secs: 0,
            max_concurrent_pairs: 2,
            pair_timeout_secs: 5,
            use_cache: true,
        }
    }

    fn scheduler(
        settings: CollectorSettings,
    ) -> (Arc<InMemoryCandleStore>, Arc<MockSource>, IngestionScheduler) {
        let store = Arc::new(InMemoryCandleStore::new());
        let source = Arc::new(MockSource::new(["BTCUSDT", "ETHUSDT", "ADAUSDT"]));
        let scheduler = IngestionScheduler::new(store.clone(), source.clone(), settings);
        (store, source, scheduler)
    }

    #[tokio::test]
    async fn test_cursor_defaults_to_epoch_start() {
        let settings = settings();
        let epoch = settings.epoch_start;
        let (_store, _source, scheduler) = scheduler(settings);
        assert_eq!(
            scheduler.resolve_cursor("BTCUSDT", Interval::OneHour).await.unwrap(),
            epoch
        );
    }

    #[tokio::test]
    async fn test_cursor_follows_high_water_mark() {
        let (store, _source, scheduler) = scheduler(settings());
        let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candle = crate::provider::normalizer::normalize_klines(
            "BTCUSDT",
            Interval::OneDay,
            &MockSource::default()
                .fetch_candles("BTCUSDT", Interval::OneDay, open, open)
                .await
                .unwrap(),
        )
        .unwrap();
        store
            .insert_batch(&candle, "BTCUSDT", Interval::OneDay)
            .await
            .unwrap();

        assert_eq!(
            scheduler.resolve_cursor("BTCUSDT", Interval::OneDay).await.unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_future_cursor_is_up_to_date() {
        let mut settings = settings();
        settings.epoch_start = Utc::now() + ChronoDuration::days(1);
        let (_store, source, scheduler) = scheduler(settings);

        let outcome = scheduler.sync_pair("BTCUSDT", Interval::OneHour).await.unwrap();
        assert_eq!(outcome, PairOutcome::UpToDate);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_filters_universe() {
        let mut settings = settings();
        settings.symbols = vec!["eth/usdt".to_string(), "DOGEUSDT".to_string()];
        let (_store, _source, scheduler) = scheduler(settings);
        assert_eq!(scheduler.enumerate_symbols().await.unwrap(), vec!["ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_skips_cycle() {
        let (_store, source, scheduler) = scheduler(settings());
        source.fail_listing(true);
        let (_tx, mut shutdown) = ShutdownSignal::channel();

        let report = scheduler.run_cycle(&mut shutdown).await;
        assert!(report.enumeration_failed);
        assert_eq!(report.attempted, 0);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_cycle_dispatches_nothing() {
        let (_store, source, scheduler) = scheduler(settings());
        let (tx, mut shutdown) = ShutdownSignal::channel();
        tx.send(()).unwrap();

        let report = scheduler.run_cycle(&mut shutdown).await;
        assert!(report.interrupted);
        assert_eq!(report.attempted, 0);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_pair_locks_are_shared_per_pair() {
        let locks = PairLocks::default();
        let a = locks.lock_for("BTCUSDT", Interval::OneHour);
        let b = locks.lock_for("BTCUSDT", Interval::OneHour);
        let c = locks.lock_for("BTCUSDT", Interval::OneDay);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_scheduler_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let (_store, _source, scheduler) = scheduler(settings());
        let (_tx, mut shutdown) = ShutdownSignal::channel();
        assert_send(&scheduler.run_cycle(&mut shutdown));

        let (_tx, shutdown) = ShutdownSignal::channel();
        assert_send(&scheduler.run(shutdown));
    }

    #[tokio::test]
    async fn test_backoff_only_follows_rate_limits() {
        let backoff = DispatchBackoff::default();
        backoff.observe(&IngestError::Fetch(FetchError::Upstream(ProviderError::Timeout(
            "slow".to_string(),
        ))));
        assert!(backoff.pending().is_none());

        backoff.observe(&IngestError::Fetch(FetchError::Upstream(ProviderError::RateLimit(
            "429".to_string(),
        ))));
        let deadline = backoff.pending().unwrap();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(remaining > Duration::from_secs(55), "{:?}", remaining);
    }

    #[test]
    fn test_report_counts() {
        let mut report = CycleReport::default();
        report.record("A", Interval::OneHour, Ok(PairOutcome::Synced { fetched: 3, inserted: 2 }));
        report.record("B", Interval::OneHour, Ok(PairOutcome::UpToDate));
        report.record(
            "C",
            Interval::OneHour,
            Err(IngestError::Task("panicked".to_string())),
        );
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.up_to_date, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 2);
    }
}
