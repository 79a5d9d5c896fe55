//! Retry classification for layer errors.

use std::fmt;
use std::time::Duration;

/// How a failure should be handled by whoever retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network blips, timeouts, dropped connections
    Transient,
    /// Bad input or a rejected request; retrying changes nothing
    Permanent,
    /// Rate limits and exhausted pools
    ResourceExhausted,
    /// Missing or invalid settings
    Configuration,
    /// Broken invariants and aborted tasks
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::ResourceExhausted => "resource_exhausted",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error enum in the workspace
///
/// Only [`category`](ErrorClassification::category) is required. The retry
/// budget itself is configuration (`binance.max_retries`), not a property of
/// the error.
pub trait ErrorClassification {
    fn category(&self) -> ErrorCategory;

    /// Worth trying again later
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }

    /// Back-off before the next attempt; `None` means do not retry
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(250)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ErrorCategory);

    impl ErrorClassification for Fixed {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    #[test]
    fn test_rate_limits_count_as_transient() {
        assert!(Fixed(ErrorCategory::Transient).is_transient());
        assert!(Fixed(ErrorCategory::ResourceExhausted).is_transient());
        assert!(!Fixed(ErrorCategory::Configuration).is_transient());
        assert!(Fixed(ErrorCategory::Permanent).is_permanent());
        assert!(!Fixed(ErrorCategory::Internal).is_permanent());
    }

    #[test]
    fn test_only_retryable_categories_suggest_delay() {
        assert_eq!(
            Fixed(ErrorCategory::ResourceExhausted).suggested_retry_delay(),
            Some(Duration::from_secs(5))
        );
        assert!(Fixed(ErrorCategory::Transient).suggested_retry_delay().is_some());
        assert_eq!(Fixed(ErrorCategory::Permanent).suggested_retry_delay(), None);
        assert_eq!(ErrorCategory::Internal.to_string(), "internal");
    }
}
