//! Bounded retry loop with jittered, doubling delays.
//!
//! Every wait in the engine (readiness, container start polling, metric
//! waits) drives one of these. The attempt ceiling is always honored, so no
//! wait can block forever.

use std::time::Duration;

use rand::Rng;
use rigging_common::config::BackoffConfig;
use rigging_common::error::{Result, RiggingError};

/// Retry state for one wait operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retries: u32,
    next_min: Duration,
    next_max: Duration,
}

impl Backoff {
    /// Creates a fresh retry state from a policy.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retries: 0,
            next_min: config.min,
            next_max: double_capped(config.min, config.max),
        }
    }

    /// Returns whether another attempt may be made.
    #[must_use]
    pub fn ongoing(&self) -> bool {
        self.retries < self.config.max_retries.max(1)
    }

    /// Number of completed attempts.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Records a failed attempt and sleeps before the next one, unless the
    /// budget is now exhausted.
    pub fn wait(&mut self) {
        self.retries += 1;
        if self.ongoing() {
            std::thread::sleep(self.next_delay());
        }
    }

    /// Computes the next delay and advances the delay window.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.next_min;
        let max = self.next_max;
        self.next_min = double_capped(min, self.config.max);
        self.next_max = double_capped(max, self.config.max);
        if min >= max {
            return max;
        }
        let low = nanos(min);
        let high = nanos(max);
        Duration::from_nanos(rand::rng().random_range(low..high))
    }
}

/// Outcome of a retry loop that never succeeded.
#[derive(Debug)]
pub struct Exhausted {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error returned by the last attempt.
    pub last_error: RiggingError,
}

/// Runs `attempt` until it succeeds or the policy is exhausted.
///
/// # Errors
///
/// Returns [`Exhausted`] carrying the attempt count and the last error.
pub fn retry<T>(
    config: BackoffConfig,
    mut attempt: impl FnMut() -> Result<T>,
) -> std::result::Result<T, Exhausted> {
    let mut backoff = Backoff::new(config);
    let mut last_error = RiggingError::config("retry loop made no attempt");
    while backoff.ongoing() {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::trace!(attempt = backoff.retries() + 1, error = %err, "attempt failed");
                last_error = err;
            }
        }
        backoff.wait();
    }
    Err(Exhausted {
        attempts: backoff.retries(),
        last_error,
    })
}

fn double_capped(value: Duration, cap: Duration) -> Duration {
    value.saturating_mul(2).min(cap)
}

fn nanos(value: Duration) -> u64 {
    u64::try_from(value.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(retries: u32) -> BackoffConfig {
        BackoffConfig::new(Duration::from_millis(1), Duration::from_millis(2), retries)
            .expect("valid backoff")
    }

    #[test]
    fn delays_stay_within_bounds() {
        let config = BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(80), 10)
            .expect("valid backoff");
        let mut backoff = Backoff::new(config);
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(10), "{delay:?}");
            assert!(delay <= Duration::from_millis(80), "{delay:?}");
        }
    }

    #[test]
    fn delays_saturate_at_max() {
        let config = BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(20), 10)
            .expect("valid backoff");
        let mut backoff = Backoff::new(config);
        let _ = backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
    }

    #[test]
    fn retry_stops_at_ceiling() {
        let mut calls = 0;
        let result: std::result::Result<(), Exhausted> = retry(fast(4), || {
            calls += 1;
            Err(RiggingError::probe(format!("attempt {calls}")))
        });
        let exhausted = result.expect_err("never succeeds");
        assert_eq!(calls, 4);
        assert_eq!(exhausted.attempts, 4);
        assert!(exhausted.last_error.to_string().contains("attempt 4"));
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let value = retry(fast(10), || {
            calls += 1;
            if calls < 3 {
                Err(RiggingError::probe("not yet"))
            } else {
                Ok(calls)
            }
        })
        .expect("succeeds on third attempt");
        assert_eq!(value, 3);
    }

    #[test]
    fn zero_ceiling_still_terminates() {
        let config = BackoffConfig {
            min: Duration::from_millis(1),
            max: Duration::from_millis(1),
            max_retries: 0,
        };
        let mut calls = 0;
        let result: std::result::Result<(), Exhausted> = retry(config, || {
            calls += 1;
            Err(RiggingError::probe("no"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
