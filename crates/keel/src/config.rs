//! Collection configuration structures.

use std::time::Duration;

use keel_crypto::HashAlgorithmChoice;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        DEFAULT_BATCH_SIZE,
        DEFAULT_CHANGE_STREAM_IDLE_MS,
        DEFAULT_RETRY_ATTEMPTS,
        DEFAULT_RETRY_MAX_DELAY_MS,
        DEFAULT_RETRY_MIN_DELAY_MS,
    },
    KeelError,
    Result,
};

/// Bounded retry with random backoff.
///
/// The operation runs up to `max_attempts` times; between attempts the caller sleeps a random
/// delay drawn uniformly from `[min_delay_ms, max_delay_ms]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Lower bound of the delay between attempts
    pub min_delay_ms: u64,
    /// Upper bound of the delay between attempts
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            min_delay_ms: DEFAULT_RETRY_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retry.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

/// Configuration of one collection handle.
///
/// Every handle on the same namespace should agree on `hash_algorithm`; the other fields are
/// local tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Records per transaction for `add_all`, `put_all`, `remove_all` and `drain_to`
    pub batch_size:                       usize,
    /// Retry policy of the offer transactions
    pub offer_retry:                      RetryConfig,
    /// Idle period after which the change stream behind blocking polls is closed
    pub stop_change_stream_after_idle_ms: u64,
    /// Expiry of map entries, enforced by a TTL index on `created_at`
    pub expire_after_secs:                Option<u64>,
    /// Fingerprint algorithm; `None` uses the global keel-crypto configuration
    pub hash_algorithm:                   Option<HashAlgorithmChoice>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            batch_size:                       DEFAULT_BATCH_SIZE,
            offer_retry:                      RetryConfig::default(),
            stop_change_stream_after_idle_ms: DEFAULT_CHANGE_STREAM_IDLE_MS,
            expire_after_secs:                None,
            hash_algorithm:                   None,
        }
    }
}

impl CollectionConfig {
    /// Sets the bulk operation chunk size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the offer retry policy.
    #[must_use]
    pub const fn with_offer_retry(mut self, retry: RetryConfig) -> Self {
        self.offer_retry = retry;
        self
    }

    /// Sets the change stream idle period, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn with_change_stream_idle(mut self, idle: Duration) -> Self {
        self.stop_change_stream_after_idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables expiry of map entries.
    ///
    /// The store works in whole seconds, so a fractional period is rounded up.
    #[must_use]
    pub const fn with_expire_after(mut self, expire_after: Duration) -> Self {
        let partial = if expire_after.subsec_nanos() > 0 { 1 } else { 0 };
        self.expire_after_secs = Some(expire_after.as_secs().saturating_add(partial));
        self
    }

    /// Overrides the fingerprint algorithm.
    #[must_use]
    pub const fn with_hash_algorithm(mut self, algorithm: HashAlgorithmChoice) -> Self {
        self.hash_algorithm = Some(algorithm);
        self
    }

    /// The change stream idle period.
    pub const fn change_stream_idle(&self) -> Duration { Duration::from_millis(self.stop_change_stream_after_idle_ms) }

    /// The map entry expiry, if any.
    pub fn expire_after(&self) -> Option<Duration> { self.expire_after_secs.map(Duration::from_secs) }

    /// Checks the configuration for values no collection can work with.
    ///
    /// # Errors
    /// `KeelError::ConfigError` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(KeelError::ConfigError {
                message: "batch_size must be at least 1".to_owned(),
            });
        }
        if self.offer_retry.max_attempts == 0 {
            return Err(KeelError::ConfigError {
                message: "offer_retry.max_attempts must be at least 1".to_owned(),
            });
        }
        if self.offer_retry.min_delay_ms > self.offer_retry.max_delay_ms {
            return Err(KeelError::ConfigError {
                message: format!(
                    "offer_retry.min_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.offer_retry.min_delay_ms, self.offer_retry.max_delay_ms
                ),
            });
        }
        if self.stop_change_stream_after_idle_ms == 0 {
            return Err(KeelError::ConfigError {
                message: "stop_change_stream_after_idle_ms must be positive".to_owned(),
            });
        }
        if self.expire_after_secs == Some(0) {
            return Err(KeelError::ConfigError {
                message: "expire_after_secs must be positive when set".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectionConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.offer_retry.max_attempts, 3);
        assert_eq!(config.offer_retry.min_delay_ms, 0);
        assert_eq!(config.offer_retry.max_delay_ms, 200);
        assert_eq!(config.expire_after(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: CollectionConfig =
            serde_json::from_str(r#"{"batch_size": 1, "expire_after_secs": 3600}"#).unwrap();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.expire_after(), Some(Duration::from_secs(3600)));
        assert_eq!(config.offer_retry, RetryConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CollectionConfig::default()
            .with_batch_size(0)
            .validate()
            .is_err());
        assert!(CollectionConfig::default()
            .with_offer_retry(RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            })
            .validate()
            .is_err());
        assert!(CollectionConfig::default()
            .with_offer_retry(RetryConfig {
                max_attempts: 3,
                min_delay_ms: 10,
                max_delay_ms: 5,
            })
            .validate()
            .is_err());
        assert!(CollectionConfig::default()
            .with_change_stream_idle(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = CollectionConfig::default()
            .with_change_stream_idle(Duration::from_millis(250))
            .with_expire_after(Duration::from_secs(60))
            .with_hash_algorithm(HashAlgorithmChoice::Sha256);
        assert_eq!(config.change_stream_idle(), Duration::from_millis(250));
        assert_eq!(config.expire_after_secs, Some(60));
        assert_eq!(config.hash_algorithm, Some(HashAlgorithmChoice::Sha256));
    }

    #[test]
    fn test_builder_durations_do_not_truncate() {
        let config = CollectionConfig::default()
            .with_expire_after(Duration::from_millis(500))
            .with_change_stream_idle(Duration::MAX);
        assert_eq!(config.expire_after_secs, Some(1));
        assert_eq!(config.stop_change_stream_after_idle_ms, u64::MAX);
        assert!(config.validate().is_ok());

        let config = CollectionConfig::default().with_expire_after(Duration::from_millis(1500));
        assert_eq!(config.expire_after(), Some(Duration::from_secs(2)));
        assert!(CollectionConfig::default()
            .with_expire_after(Duration::ZERO)
            .validate()
            .is_err());
    }
}
