// src/check/retry.rs

//! Bounded retry with exponential backoff around a backend call

use crate::check::CancelToken;
use crate::config::RetryConfig;
use crate::solver::SolveResult;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

/// Final result of a retried call
#[derive(Debug, Clone)]
pub struct Attempted {
    pub result: SolveResult,
    /// Calls made, at least one
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that calls once and never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Call `op` until it produces something other than a retryable
    /// [`SolveResult::BackendError`] or the attempt cap is reached
    ///
    /// Conflicts and unsupported targets are returned immediately.
    /// Cancellation stops retrying; the backoff sleep wakes up early.
    pub fn run<F>(&self, cancel: &CancelToken, mut op: F) -> Attempted
    where
        F: FnMut(u32) -> SolveResult,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = op(attempt);

            let SolveResult::BackendError(failure) = &result else {
                return Attempted { result, attempts: attempt };
            };
            if !failure.is_retryable() || cancel.is_cancelled() {
                debug!("Not retrying: {}", failure);
                return Attempted { result, attempts: attempt };
            }
            if attempt >= self.max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, failure);
                return Attempted { result, attempts: attempt };
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Attempt {}/{} failed: {}, retrying in {:?}",
                attempt, self.max_attempts, failure, delay
            );
            if !cancel.sleep(delay) {
                debug!("Cancelled during backoff");
                return Attempted { result, attempts: attempt };
            }
        }
    }
}
