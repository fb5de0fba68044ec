//! Bounded exponential backoff.
//!
//! [`RetryPolicy`] holds the backoff parameters and computes delays;
//! [`retry`] drives any async operation with it.  The helper sleeps on the
//! tokio clock, so dropping its future cancels a pending retry.

use std::future::Future;
use std::time::Duration;

/// Backoff parameters for one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following one.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(3_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt `attempt` (0-based) failed, or `None` once
    /// the retry budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
///
/// `op` receives the 0-based attempt number.  `on_retry` is called with the
/// error, the attempt that failed and the delay before the next attempt.
/// The last error is returned on failure.
pub async fn retry<T, E, Op, Fut>(
    policy: &RetryPolicy,
    mut op: Op,
    is_retryable: impl Fn(&E) -> bool,
    mut on_retry: impl FnMut(&E, u32, Duration),
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }
        let Some(delay) = policy.delay_for(attempt) else {
            return Err(err);
        };

        on_retry(&err, attempt, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
