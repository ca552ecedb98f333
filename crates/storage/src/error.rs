//! Storage error kinds.

use agrocap_primitives::PoolId;

/// Result alias for ledger-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a [`LedgerStore`](crate::LedgerStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced pool does not exist.
    #[error("pool {0} not found")]
    PoolNotFound(PoolId),

    /// A pool with this id already exists.
    #[error("pool {0} already exists")]
    PoolAlreadyExists(PoolId),

    /// A guard re-checked under the row lock no longer holds; the state
    /// changed between the caller's read and this commit. Retryable.
    #[error("concurrent mutation on pool {pool_id}: {reason}")]
    ConcurrentMutation {
        /// Pool whose state moved underneath the caller.
        pool_id: PoolId,
        /// Which guard failed.
        reason: String,
    },

    /// Committing would corrupt the capital equation or drive a bucket
    /// negative. The transaction is rolled back; this is fatal.
    #[error("capital invariant violated on pool {pool_id}: {reason}")]
    InvariantViolation {
        /// Pool the violation was detected on.
        pool_id: PoolId,
        /// What would have been corrupted.
        reason: String,
    },

    /// The backend itself failed (I/O, connectivity). Retryable with
    /// backoff.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentMutation { .. } | Self::Unavailable(_))
    }
}
