//! Bounded retry with random backoff around transactional units.

use std::{future::Future, time::Duration};

use rand::Rng as _;
use tracing::{debug, warn};

use crate::{config::RetryConfig, KeelError, Result};

/// Runs `op` until it succeeds, fails with a non-retryable error, or `config.max_attempts`
/// attempts were made.
///
/// Between attempts the task sleeps a random delay within the configured bounds. Only errors
/// for which [`KeelError::is_retryable`] holds are retried; the last one is wrapped into
/// `KeelError::RetriesExhausted`.
///
/// `op` has to rebuild the whole unit of work on every call: a transaction that lost a race
/// must re-read what it depends on.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("'{}' succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            },
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = random_delay(config);
                warn!(
                    "'{}' attempt {}/{} failed: {}; retrying in {:?}",
                    operation, attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            },
            Err(err) if err.is_retryable() => {
                warn!("'{}' giving up after {} attempts: {}", operation, attempt, err);
                return Err(KeelError::RetriesExhausted {
                    operation: operation.to_owned(),
                    attempts:  attempt,
                    source:    Box::new(err),
                });
            },
            Err(err) => return Err(err),
        }
    }
}

fn random_delay(config: &RetryConfig) -> Duration {
    let millis = if config.max_delay_ms > config.min_delay_ms {
        rand::rng().random_range(config.min_delay_ms ..= config.max_delay_ms)
    }
    else {
        config.min_delay_ms
    };
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn conflict() -> KeelError {
        KeelError::TransientConflict {
            namespace: "q".to_owned(),
            reason:    "test".to_owned(),
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            min_delay_ms: 0,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_with_backoff(&fast(3), "offer_last", move || {
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                }
                else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_with_backoff(&fast(3), "offer_first", move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            }
        })
        .await;
        match result {
            Err(KeelError::RetriesExhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "offer_first");
                assert_eq!(attempts, 3);
                assert!(source.is_retryable());
            },
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_immediate() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_with_backoff(&fast(5), "offer_last", move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KeelError::NullElement {
                    operation: "offer_last".to_owned(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(KeelError::NullElement { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_random_delay_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            min_delay_ms: 5,
            max_delay_ms: 10,
        };
        for _ in 0 .. 100 {
            let delay = random_delay(&config);
            assert!(delay >= Duration::from_millis(5) && delay <= Duration::from_millis(10));
        }
        assert_eq!(random_delay(&RetryConfig::no_retry()), Duration::ZERO);
    }
}
