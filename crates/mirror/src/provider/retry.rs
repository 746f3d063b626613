//! Bounded retry for individual provider calls
//!
//! Only transient failures (network drops, 5xx) are retried here. Throttle
//! errors surface immediately so the backoff policy can put the whole
//! account into cooldown instead of hammering an exhausted quota window.

use std::time::Duration;

use super::ProviderError;

/// Bounds for within-call retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Run `op`, retrying transient failures with exponential backoff and
/// jitter. Exhausting the attempt budget surfaces the last error.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    let mut delay = policy.base_delay;
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let jitter = Duration::from_millis(rand_jitter());
                log::debug!(
                    "[RETRY] transient provider error (attempt {}): {}",
                    attempt + 1,
                    err
                );
                std::thread::sleep((delay + jitter).min(policy.max_delay));
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns on the last attempt")
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_success_first_try() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_policy(), || {
            calls.set(calls.get() + 1);
            Ok::<_, ProviderError>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_transient_errors_retried() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_policy(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::from_status(503, "unavailable"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_attempts_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), || {
            calls.set(calls.get() + 1);
            Err(ProviderError::Network("connection reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_throttle_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), || {
            calls.set(calls.get() + 1);
            Err(ProviderError::from_status(429, "slow down"))
        });
        assert!(matches!(result, Err(ProviderError::Throttled { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_checkpoint_expired_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), || {
            calls.set(calls.get() + 1);
            Err(ProviderError::CheckpointExpired)
        });
        assert!(matches!(result, Err(ProviderError::CheckpointExpired)));
        assert_eq!(calls.get(), 1);
    }
}
