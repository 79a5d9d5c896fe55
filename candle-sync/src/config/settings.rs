//! Application settings and configuration

use chrono::{DateTime, TimeZone, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use market_common::Interval;

/// Main application settings
///
/// Built once at process start and passed down to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Upstream Binance REST configuration
    #[serde(default)]
    pub binance: BinanceSettings,
    /// Ingestion loop configuration
    #[serde(default)]
    pub collector: CollectorSettings,
    /// Declarative schema source
    #[serde(default)]
    pub schema: SchemaSettings,
    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    #[serde(default = "DatabaseSettings::url_from_env")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

impl DatabaseSettings {
    /// Resolve the connection URL from the environment
    ///
    /// `DATABASE_URL` wins; otherwise the URL is composed from `DB_USER`,
    /// `DB_PASSWORD`, `DB_HOST`, `DB_PORT` and `DB_NAME` with local defaults.
    pub fn url_from_env() -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };
        Self::url_from_parts(
            &var("DB_USER", "postgres"),
            &var("DB_PASSWORD", "postgres"),
            &var("DB_HOST", "localhost"),
            &var("DB_PORT", "5432"),
            &var("DB_NAME", "trading"),
        )
    }

    pub fn url_from_parts(user: &str, password: &str, host: &str, port: &str, name: &str) -> String {
        format!("postgresql://{}:{}@{}:{}/{}", user, password, host, port, name)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Connection URL with the password masked, for log lines
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                let credentials = &self.url[scheme_end + 3..at];
                match credentials.split_once(':') {
                    Some((user, _)) => format!(
                        "{}{}:***{}",
                        &self.url[..scheme_end + 3],
                        user,
                        &self.url[at..]
                    ),
                    None => self.url.clone(),
                }
            }
            _ => self.url.clone(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: Self::url_from_env(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Binance REST settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceSettings {
    /// REST base URL
    #[serde(default = "default_binance_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Request weight budget per minute
    #[serde(default = "default_weight_per_minute")]
    pub request_weight_per_minute: u32,
    /// Weight charged for one klines request
    #[serde(default = "default_kline_weight")]
    pub kline_request_weight: u32,
    /// Candles requested per page (exchange maximum is 1000)
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Pages fetched per pair per cycle; the next cycle resumes where this one stopped
    #[serde(default = "default_max_pages")]
    pub max_pages_per_fetch: u32,
    /// Retries for transient request failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_binance_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_weight_per_minute() -> u32 {
    1200
}

fn default_kline_weight() -> u32 {
    2
}

fn default_page_limit() -> u32 {
    1000
}

fn default_max_pages() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    2
}

impl BinanceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            base_url: default_binance_base_url(),
            request_timeout_secs: default_request_timeout(),
            request_weight_per_minute: default_weight_per_minute(),
            kline_request_weight: default_kline_weight(),
            page_limit: default_page_limit(),
            max_pages_per_fetch: default_max_pages(),
            max_retries: default_max_retries(),
        }
    }
}

// =============================================================================
// COLLECTOR CONFIGURATION
// =============================================================================

/// Ingestion loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Intervals synchronized for every symbol
    #[serde(default = "default_intervals")]
    pub intervals: Vec<Interval>,
    /// Symbol allow-list; empty means every tradable symbol
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Resume point for pairs with no stored candles
    #[serde(default = "default_epoch_start")]
    pub epoch_start: DateTime<Utc>,
    /// Pause between pair dispatches in milliseconds
    #[serde(default = "default_pair_delay")]
    pub pair_delay_ms: u64,
    /// Pause between full cycles in seconds
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,
    /// Pairs synchronized concurrently
    #[serde(default = "default_max_concurrent_pairs")]
    pub max_concurrent_pairs: usize,
    /// Upper bound for one pair's cursor, fetch and persist sequence
    #[serde(default = "default_pair_timeout")]
    pub pair_timeout_secs: u64,
    /// Consult the candle store before going upstream
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

fn default_intervals() -> Vec<Interval> {
    Interval::ALL.to_vec()
}

/// Earliest kline history the exchange serves
fn default_epoch_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 8, 17, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn default_pair_delay() -> u64 {
    200
}

fn default_cycle_delay() -> u64 {
    60
}

fn default_max_concurrent_pairs() -> usize {
    4
}

fn default_pair_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl CollectorSettings {
    pub fn pair_delay(&self) -> Duration {
        Duration::from_millis(self.pair_delay_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn pair_timeout(&self) -> Duration {
        Duration::from_secs(self.pair_timeout_secs)
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
            symbols: Vec::new(),
            epoch_start: default_epoch_start(),
            pair_delay_ms: default_pair_delay(),
            cycle_delay_secs: default_cycle_delay(),
            max_concurrent_pairs: default_max_concurrent_pairs(),
            pair_timeout_secs: default_pair_timeout(),
            use_cache: true,
        }
    }
}

/// Declarative schema source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSettings {
    /// Path of the `CREATE TABLE IF NOT EXISTS` script
    #[serde(default = "default_schema_path")]
    pub path: PathBuf,
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("sql/init.sql")
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            path: default_schema_path(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Rows per multi-row INSERT statement
    #[serde(default = "default_batch_size")]
    pub batch_insert_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            batch_insert_size: default_batch_size(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("CANDLE_SYNC")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., CANDLE_SYNC__DATABASE__URL)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("collector.intervals")
                    .with_list_parse_key("collector.symbols")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("CANDLE_SYNC_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default_settings();
        assert_eq!(settings.database.max_connections, 10);
        assert_eq!(settings.collector.intervals.len(), Interval::ALL.len());
        assert!(settings.collector.symbols.is_empty());
        assert_eq!(settings.collector.pair_delay(), Duration::from_millis(200));
        assert_eq!(settings.collector.cycle_delay(), Duration::from_secs(60));
        assert_eq!(settings.schema.path, PathBuf::from("sql/init.sql"));
        assert_eq!(settings.storage.batch_insert_size, 1000);
    }

    #[test]
    fn test_default_epoch_start() {
        let settings = CollectorSettings::default();
        assert_eq!(
            settings.epoch_start,
            Utc.with_ymd_and_hms(2017, 8, 17, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_url_from_parts() {
        assert_eq!(
            DatabaseSettings::url_from_parts("postgres", "secret", "db", "5433", "trading"),
            "postgresql://postgres:secret@db:5433/trading"
        );
    }

    #[test]
    fn test_redacted_url_hides_password() {
        let settings = DatabaseSettings {
            url: "postgresql://postgres:secret@db:5432/trading".to_string(),
            ..DatabaseSettings::default()
        };
        assert_eq!(settings.redacted_url(), "postgresql://postgres:***@db:5432/trading");

        let no_password = DatabaseSettings {
            url: "postgresql://localhost/trading".to_string(),
            ..DatabaseSettings::default()
        };
        assert_eq!(no_password.redacted_url(), "postgresql://localhost/trading");
    }

    #[test]
    fn test_collector_settings_deserialize() {
        let json = r#"{
            "intervals": ["1h", "1d"],
            "symbols": ["BTCUSDT"],
            "epoch_start": "2020-01-01T00:00:00Z",
            "pair_delay_ms": 0
        }"#;
        let settings: CollectorSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.intervals, vec![Interval::OneHour, Interval::OneDay]);
        assert_eq!(settings.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(settings.pair_delay_ms, 0);
        assert_eq!(settings.max_concurrent_pairs, 4);
        assert!(settings.use_cache);
    }
}
