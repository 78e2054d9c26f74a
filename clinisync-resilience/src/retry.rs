//! Retry with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Sleeps never go below this, jitter included.
const MIN_DELAY: Duration = Duration::from_millis(100);

/// Classification hook for retry decisions.
///
/// `retry_after` lets an error carry its own delay (rate-limit responses);
/// when present it takes precedence over the exponential formula.
pub trait RetryableError {
    fn retryable(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Exponential backoff policy.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Random factor in `[-jitter_factor, +jitter_factor]` applied to each
    /// computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before the retry that follows `attempt` (1-based).
    fn delay_after<E: RetryableError>(&self, attempt: u32, error: &E) -> Duration {
        if let Some(delay) = error.retry_after() {
            return delay.max(MIN_DELAY);
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter_factor > 0.0 {
            let factor = rand::rng().random_range(-self.jitter_factor..=self.jitter_factor);
            capped * (1.0 + factor)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64).max(MIN_DELAY)
    }

    /// Runs `op` until it succeeds, fails non-retryably, or attempts are
    /// exhausted. The closure receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: RetryableError + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < total_attempts => {
                    let delay = self.delay_after(attempt, &err);
                    warn!("attempt {attempt}/{total_attempts} failed ({err}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
