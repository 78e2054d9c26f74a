//! Sync engine error taxonomy.
//!
//! Every failure class the engine can surface is a typed variant; retry and
//! re-authentication policy hang off the unified [`SyncError`] so the
//! resilience layer never inspects error strings.

use clinisync_crypto::CryptoError;
use clinisync_resilience::{BreakerError, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no network connectivity")]
    NoConnectivity,

    #[error("network timeout")]
    Timeout,

    #[error("remote server error: {0}")]
    ServerError(String),

    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },

    #[error("DNS resolution failed")]
    DnsFailure,

    #[error("connection refused")]
    ConnectionRefused,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication token expired")]
    TokenExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    AccountDisabled,

    #[error("permission denied")]
    PermissionDenied,
}

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("insufficient storage space")]
    InsufficientSpace,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,
}

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("unresolvable conflict: {0}")]
    Unresolvable(String),

    #[error("{} conflicts require manual resolution", .0.len())]
    Multiple(Vec<String>),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{0} already in progress")]
    AlreadyInProgress(String),

    #[error("invalid engine state: {0}")]
    InvalidState(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Unified error surface of every top-level engine operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("requires re-authentication: {0}")]
    Auth(#[from] AuthError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("operation error: {0}")]
    Operation(#[from] OperationError),

    /// Fail-fast rejection from the circuit breaker; the remote was not
    /// contacted.
    #[error("circuit breaker open, remote temporarily unavailable")]
    CircuitOpen,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Transient network failures and not-yet-visible remote objects are
    /// retried; auth, integrity, and conflict errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Storage(StorageError::NotFound(_))
        )
    }

    /// True when the caller must re-authenticate before retrying anything.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Error-specific backoff override (rate limiting).
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Network(NetworkError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

impl RetryableError for SyncError {
    fn retryable(&self) -> bool {
        self.is_retryable()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_delay()
    }
}

impl From<BreakerError<SyncError>> for SyncError {
    fn from(err: BreakerError<SyncError>) -> Self {
        match err {
            BreakerError::Open => Self::CircuitOpen,
            BreakerError::Timeout(_) => Self::Network(NetworkError::Timeout),
            BreakerError::Inner(inner) => inner,
        }
    }
}
