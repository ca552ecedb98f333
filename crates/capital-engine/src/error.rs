//! Engine error kinds.
//!
//! Every failure carries a stable string code (see [`EngineError::code`])
//! so callers can branch programmatically without matching on Rust enums
//! across a serialization boundary. Retryable kinds are retried inside the
//! engine for a bounded number of attempts before they surface.

use agrocap_primitives::{PoolId, ReservationId, RiskTier};
use agrocap_storage::StoreError;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::validate::ConstraintKind;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A pool that was considered but rejected during selection, annotated with
/// the constraint that ruled it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAlternative {
    /// Candidate pool.
    pub pool_id: PoolId,
    /// Candidate name.
    pub name: String,
    /// The specific constraint that failed.
    pub failing_constraint: ConstraintKind,
}

/// Errors surfaced by the capital engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No pool satisfies the request; up to three near-miss alternatives
    /// are attached.
    #[error("no pool satisfies the request ({} alternatives)", alternatives.len())]
    PoolNotFound {
        /// Closest rejected candidates, annotated with why they failed.
        alternatives: Vec<PoolAlternative>,
    },

    /// The pool exists but is not accepting allocations.
    #[error("pool {0} is not accepting allocations")]
    PoolPaused(PoolId),

    /// Requested amount is below the pool's minimum advance.
    #[error("amount {amount} is below the pool minimum {minimum}")]
    AmountBelowMinimum {
        /// Requested amount.
        amount: Decimal,
        /// Pool minimum.
        minimum: Decimal,
    },

    /// Requested amount is above the pool's maximum advance.
    #[error("amount {amount} is above the pool maximum {maximum}")]
    AmountAboveMaximum {
        /// Requested amount.
        amount: Decimal,
        /// Pool maximum.
        maximum: Decimal,
    },

    /// A single advance may not exceed the configured share of total
    /// capital.
    #[error("amount {amount} exceeds the single-advance ceiling {ceiling}")]
    ExposureLimitExceeded {
        /// Requested amount.
        amount: Decimal,
        /// Current ceiling.
        ceiling: Decimal,
    },

    /// Committing would leave available capital under the reserve floor.
    #[error("allocation would leave {available_after} against a required reserve of {required_reserve}")]
    ReserveRatioViolation {
        /// Available capital after the operation.
        available_after: Decimal,
        /// The floor that must be kept.
        required_reserve: Decimal,
    },

    /// A reservation asked for more than the pool can hold right now.
    #[error("requested hold {requested} exceeds effective available {effective_available}")]
    InsufficientEffectiveAvailable {
        /// Requested hold amount.
        requested: Decimal,
        /// Deployable capital right now.
        effective_available: Decimal,
    },

    /// The preferred pool's risk tier does not match the advance.
    #[error("pool is tier {pool_tier}, advance is tier {requested_tier}")]
    RiskTierMismatch {
        /// Tier of the selected pool.
        pool_tier: RiskTier,
        /// Tier of the advance.
        requested_tier: RiskTier,
    },

    /// The farmer's outstanding exposure would exceed the pool's ceiling.
    #[error("farmer {farmer_id} exposure {exposure} + amount would exceed limit {limit}")]
    FarmerLimitExceeded {
        /// Farmer in question.
        farmer_id: String,
        /// Current outstanding exposure.
        exposure: Decimal,
        /// Pool exposure ceiling.
        limit: Decimal,
    },

    /// State moved between read and commit. Retried internally; surfaces
    /// only once the attempt budget is exhausted.
    #[error("concurrent mutation on pool {pool_id}")]
    ConcurrentMutation {
        /// Contended pool.
        pool_id: PoolId,
    },

    /// The per-pool lease lock was not acquired within the timeout.
    #[error("could not lock pool {0} within the acquire timeout")]
    LockUnavailable(PoolId),

    /// Commit or release on a reservation that is missing, already settled
    /// or expired.
    #[error("reservation {0} not found or no longer active")]
    ReservationNotFound(ReservationId),

    /// A capital invariant would be broken. Fatal: the transaction is
    /// rolled back and the error must page.
    #[error("capital invariant violated on pool {pool_id}: {reason}")]
    InvariantViolation {
        /// Affected pool.
        pool_id: PoolId,
        /// What would have been corrupted.
        reason: String,
    },

    /// The ledger store failed.
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),

    /// The cache accelerator failed.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Malformed input.
    #[error("invalid request: {0}")]
    ValidationError(String),

    /// Anything else; carries a correlation id for log lookup.
    #[error("internal error [{correlation_id}]: {message}")]
    InternalError {
        /// Correlation id echoed into the logs.
        correlation_id: Uuid,
        /// Human-readable context.
        message: String,
    },
}

impl EngineError {
    /// Stable identifier for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolNotFound { .. } => "PoolNotFound",
            Self::PoolPaused(_) => "PoolPaused",
            Self::AmountBelowMinimum { .. } => "AmountBelowMinimum",
            Self::AmountAboveMaximum { .. } => "AmountAboveMaximum",
            Self::ExposureLimitExceeded { .. } => "ExposureLimitExceeded",
            Self::ReserveRatioViolation { .. } => "ReserveRatioViolation",
            Self::InsufficientEffectiveAvailable { .. } => "InsufficientEffectiveAvailable",
            Self::RiskTierMismatch { .. } => "RiskTierMismatch",
            Self::FarmerLimitExceeded { .. } => "FarmerLimitExceeded",
            Self::ConcurrentMutation { .. } => "ConcurrentMutation",
            Self::LockUnavailable(_) => "LockUnavailable",
            Self::ReservationNotFound(_) => "ReservationNotFound",
            Self::InvariantViolation { .. } => "InvariantViolation",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::CacheUnavailable(_) => "CacheUnavailable",
            Self::ValidationError(_) => "ValidationError",
            Self::InternalError { .. } => "InternalError",
        }
    }

    /// Whether the engine's bounded retry loop may re-attempt the
    /// operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentMutation { .. }
                | Self::LockUnavailable(_)
                | Self::StoreUnavailable(_)
                | Self::CacheUnavailable(_)
        )
    }

    /// An [`InternalError`](Self::InternalError) with a fresh correlation
    /// id.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { correlation_id: Uuid::new_v4(), message: message.into() }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PoolNotFound(_) => Self::PoolNotFound { alternatives: Vec::new() },
            StoreError::PoolAlreadyExists(id) => {
                Self::ValidationError(format!("pool {id} already exists"))
            }
            StoreError::ConcurrentMutation { pool_id, .. } => {
                Self::ConcurrentMutation { pool_id }
            }
            StoreError::InvariantViolation { pool_id, reason } => {
                Self::InvariantViolation { pool_id, reason }
            }
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::PoolNotFound { alternatives: vec![] }.code(), "PoolNotFound");
        assert_eq!(EngineError::LockUnavailable(PoolId::random()).code(), "LockUnavailable");
        assert_eq!(EngineError::ValidationError("x".into()).code(), "ValidationError");
    }

    #[test]
    fn retryability_matches_policy() {
        assert!(EngineError::ConcurrentMutation { pool_id: PoolId::random() }.is_retryable());
        assert!(EngineError::StoreUnavailable("down".into()).is_retryable());
        assert!(!EngineError::ReservationNotFound(ReservationId::random()).is_retryable());
        assert!(!EngineError::InvariantViolation {
            pool_id: PoolId::random(),
            reason: "broken".into()
        }
        .is_retryable());
    }
}
