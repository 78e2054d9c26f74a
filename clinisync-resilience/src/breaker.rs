//! Circuit breaker for remote backends.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker lifecycle: closed → open → half-open → closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting a trial call.
    pub reset_timeout: Duration,
    /// Per-call timeout; a timed-out call counts as a failure.
    pub op_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(20),
        }
    }
}

/// Error surface of a call through the breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Fail-fast rejection: the wrapped operation was never invoked.
    #[error("circuit breaker is open")]
    Open,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Tracks consecutive failures and fails fast while a backend is down.
///
/// While open, calls are rejected without invoking the wrapped operation
/// until `reset_timeout` has elapsed; then exactly one trial call is
/// admitted. Trial success closes the breaker, trial failure reopens it.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Runs `op` through the breaker, subject to the operation timeout.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                BreakerState::Closed => {}
                BreakerState::Open => {
                    let waited = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    if waited < self.config.reset_timeout {
                        return Err(BreakerError::Open);
                    }
                    debug!("reset timeout elapsed, admitting trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                }
                BreakerState::HalfOpen => {
                    // One trial at a time
                    if inner.trial_in_flight {
                        return Err(BreakerError::Open);
                    }
                    inner.trial_in_flight = true;
                }
            }
        }

        let outcome = tokio::time::timeout(self.config.op_timeout, op()).await;

        let mut inner = self.inner.lock().unwrap();
        match outcome {
            Ok(Ok(value)) => {
                if inner.state == BreakerState::HalfOpen {
                    debug!("trial call succeeded, closing breaker");
                }
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                Ok(value)
            }
            Ok(Err(err)) => {
                Self::record_failure(&mut inner, &self.config);
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                Self::record_failure(&mut inner, &self.config);
                Err(BreakerError::Timeout(self.config.op_timeout))
            }
        }
    }

    fn record_failure(inner: &mut BreakerInner, config: &CircuitBreakerConfig) {
        inner.trial_in_flight = false;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let reopen = inner.state == BreakerState::HalfOpen;
        if reopen || inner.consecutive_failures >= config.failure_threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    "breaker opening after {} consecutive failure(s)",
                    inner.consecutive_failures
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}
