//! Resilience primitives for remote operations.
//!
//! Every remote call in the sync core goes through this layer:
//! [`RetryPolicy`] handles transient failures with exponential backoff and
//! jitter, [`CircuitBreaker`] stops hammering a failing backend, and
//! [`Debouncer`] coalesces bursts of triggers into one delayed run.
//!
//! Recommended composition: the breaker wraps the whole retried operation,
//! so a retry-exhausted failure counts once toward the breaker.

mod breaker;
mod debounce;
mod retry;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use debounce::Debouncer;
pub use retry::{RetryPolicy, RetryableError};
