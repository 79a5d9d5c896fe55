//! Logging configuration and initialization.

use std::env;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";
const UTC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human-readable
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else if s.eq_ignore_ascii_case("compact") {
            LogFormat::Compact
        } else {
            LogFormat::Pretty
        }
    }
}

/// Timestamp style for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    None,
}

impl From<&str> for TimestampFormat {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration
///
/// `filter` is an `EnvFilter` directive string. It only applies when `RUST_LOG`
/// is unset; `RUST_LOG` always wins.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    pub filter: String,
    /// Append `file:line` to every event
    pub include_location: bool,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            filter: "info".to_string(),
            include_location: false,
            include_thread_ids: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl LogConfig {
    /// Config from `LOG_FORMAT`, `LOG_TIMESTAMPS`, `LOG_LEVEL`, `LOG_LOCATION` and
    /// `LOG_THREAD_IDS`
    ///
    /// `LOG_LEVEL` becomes a global filter such as `debug`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::from(s.as_str()))
                .unwrap_or(defaults.format),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::from(s.as_str()))
                .unwrap_or(defaults.timestamps),
            filter: env::var("LOG_LEVEL").unwrap_or(defaults.filter),
            include_location: env_flag("LOG_LOCATION"),
            include_thread_ids: env_flag("LOG_THREAD_IDS"),
        }
    }

    /// Like [`LogConfig::from_env`], but `LOG_LEVEL` (default `info`) is scoped to
    /// the named crates so dependency noise (sqlx, hyper) stays at `warn`.
    pub fn for_crates(crates: &[&str]) -> Self {
        let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::from_env().with_filter(crate_filter(&level, crates))
    }

    /// Replace the filter directive
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// `warn,<crate>=<level>,...` for each crate name
fn crate_filter(level: &str, crates: &[&str]) -> String {
    std::iter::once("warn".to_string())
        .chain(crates.iter().map(|name| format!("{}={}", name, level)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global subscriber
/// is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };

    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Box `$layer` with the timer selected by `$timestamps`
macro_rules! timed {
    ($layer:expr, $timestamps:expr) => {
        match $timestamps {
            TimestampFormat::Local => $layer
                .with_timer(ChronoLocal::new(LOCAL_TIME_FORMAT.to_string()))
                .boxed(),
            TimestampFormat::Utc => $layer
                .with_timer(ChronoUtc::new(UTC_TIME_FORMAT.to_string()))
                .boxed(),
            TimestampFormat::None => $layer.without_time().boxed(),
        }
    };
}

fn output_layer(config: &LogConfig) -> BoxedLayer {
    let ansi = config.format != LogFormat::Json && atty::is(atty::Stream::Stdout);
    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Json => timed!(base.json(), config.timestamps),
        LogFormat::Compact => timed!(base.compact(), config.timestamps),
        LogFormat::Pretty => timed!(base, config.timestamps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!(LogFormat::from("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::from("whatever"), LogFormat::Pretty);
        assert_eq!(TimestampFormat::from("UTC"), TimestampFormat::Utc);
        assert_eq!(TimestampFormat::from("off"), TimestampFormat::None);
        assert_eq!(TimestampFormat::from(""), TimestampFormat::Local);
    }

    #[test]
    fn test_crate_filter_scopes_level() {
        assert_eq!(
            crate_filter("debug", &["candle_sync", "market_common"]),
            "warn,candle_sync=debug,market_common=debug"
        );
        assert_eq!(crate_filter("info", &[]), "warn");
    }

    #[test]
    fn test_with_filter_replaces_directive() {
        let config = LogConfig::default().with_filter("candle_sync=trace");
        assert_eq!(config.filter, "candle_sync=trace");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(EnvFilter::try_new(&config.filter).is_ok());
    }
}
