//! Progress reporting and cooperative cancellation.

use crate::error::{OperationError, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Progress callback: fraction in `[0, 1]` plus a human-readable step label.
pub type ProgressFn = dyn Fn(f64, &str) + Send + Sync;

/// Reports progress monotonically — a late or out-of-order report can never
/// move the fraction backwards.
pub struct ProgressReporter {
    callback: Option<Arc<ProgressFn>>,
    last: Mutex<f64>,
}

impl ProgressReporter {
    pub fn new(callback: Option<Arc<ProgressFn>>) -> Self {
        Self {
            callback,
            last: Mutex::new(0.0),
        }
    }

    pub fn report(&self, fraction: f64, step: &str) {
        let mut last = self.last.lock().unwrap();
        let clamped = fraction.clamp(0.0, 1.0).max(*last);
        *last = clamped;
        debug!("progress {:.0}%: {step}", clamped * 100.0);
        if let Some(callback) = &self.callback {
            callback(clamped, step);
        }
    }
}

/// Cooperative cancellation flag, checked before each remote call boundary.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors with `OperationError::Cancelled` once the token is tripped.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(OperationError::Cancelled.into())
        } else {
            Ok(())
        }
    }
}
