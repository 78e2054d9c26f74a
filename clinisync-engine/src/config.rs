//! Engine configuration.

use crate::retention::RetentionPolicy;
use clinisync_resilience::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Automatic conflict handling policy for sync and restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Compare `last_modified`; remote wins only when strictly more recent.
    LastWriteWins,
    UseLocal,
    UseRemote,
    /// Field-level merge, conservative toward local data.
    Merge,
    /// Park conflicts for the caller to resolve explicitly.
    Manual,
}

/// Configuration for the sync engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// The clinic this engine instance serves; also the key scope.
    pub tenant_id: String,

    /// Identifier of this device/process, stamped into snapshots.
    pub origin_id: String,

    /// Tables included in sync, backup, and restore.
    pub sync_tables: Vec<String>,

    pub conflict_policy: ConflictPolicy,

    pub retention: RetentionPolicy,

    pub retry: RetryPolicy,

    pub breaker: CircuitBreakerConfig,
}

impl EngineConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        origin_id: impl Into<String>,
        sync_tables: Vec<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            origin_id: origin_id.into(),
            sync_tables,
            conflict_policy: ConflictPolicy::LastWriteWins,
            retention: RetentionPolicy::default(),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}
