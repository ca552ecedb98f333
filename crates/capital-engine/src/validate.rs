//! Advance constraint validation.
//!
//! One place evaluates every funding constraint so the pre-commit check,
//! the in-lock re-validation and the read-only eligibility probe cannot
//! drift apart.

use crate::{config::EngineConfig, error::EngineError, EngineResult};
use agrocap_primitives::{money::percent_of, BalanceSnapshot, Pool, RiskTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

/// The individual constraints an advance is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    /// Pool is not accepting allocations.
    PoolStatus,
    /// Pool currency differs from the request.
    Currency,
    /// Below the pool's minimum advance.
    MinAdvance,
    /// Above the pool's maximum advance.
    MaxAdvance,
    /// Above the single-advance share of total capital.
    SingleAdvanceCeiling,
    /// Would leave available capital under the reserve floor (or eat into
    /// active holds).
    EffectiveAvailable,
    /// Farmer's outstanding exposure would exceed the pool ceiling.
    FarmerExposure,
    /// Pool risk tier differs from the advance.
    RiskTier,
}

/// Read-only eligibility probe result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    /// Probed pool.
    pub pool_id: agrocap_primitives::PoolId,
    /// Whether every constraint passes.
    pub eligible: bool,
    /// The constraints that fail for the probed amount.
    pub failing: Vec<ConstraintKind>,
    /// The largest amount the pool would currently fund.
    pub max_allowed: Decimal,
    /// The constraint that defines `max_allowed`.
    pub governing_constraint: ConstraintKind,
}

/// Ceiling a single advance may not exceed: the configured share of the
/// pool's total capital.
pub(crate) fn single_advance_ceiling(pool: &Pool, config: &EngineConfig) -> Decimal {
    percent_of(pool.total_capital, config.max_single_advance_ratio)
}

/// Validates an advance amount against a pool, using `snapshot` for the
/// hold-aware effective availability.
pub(crate) fn check_advance(
    pool: &Pool,
    snapshot: &BalanceSnapshot,
    amount: Decimal,
    config: &EngineConfig,
) -> EngineResult<()> {
    if !pool.accepts_allocations() {
        return Err(EngineError::PoolPaused(pool.id));
    }
    if amount < pool.min_advance_amount {
        return Err(EngineError::AmountBelowMinimum {
            amount,
            minimum: pool.min_advance_amount,
        });
    }
    if amount > pool.max_advance_amount {
        return Err(EngineError::AmountAboveMaximum {
            amount,
            maximum: pool.max_advance_amount,
        });
    }
    let ceiling = single_advance_ceiling(pool, config);
    if amount > ceiling {
        return Err(EngineError::ExposureLimitExceeded { amount, ceiling });
    }
    if amount > snapshot.effective_available {
        return Err(EngineError::ReserveRatioViolation {
            available_after: pool.available_capital - amount,
            required_reserve: pool.required_reserve(),
        });
    }
    Ok(())
}

/// Validates a farmer's aggregate exposure after adding `amount`.
pub(crate) fn check_farmer_exposure(
    pool: &Pool,
    farmer_id: &str,
    current_exposure: Decimal,
    amount: Decimal,
) -> EngineResult<()> {
    if current_exposure + amount > pool.max_exposure_limit {
        return Err(EngineError::FarmerLimitExceeded {
            farmer_id: farmer_id.to_owned(),
            exposure: current_exposure,
            limit: pool.max_exposure_limit,
        });
    }
    Ok(())
}

/// The first constraint that rules a candidate out, for annotating
/// selection alternatives.
pub(crate) fn first_failing(
    pool: &Pool,
    snapshot: &BalanceSnapshot,
    amount: Decimal,
    config: &EngineConfig,
) -> Option<ConstraintKind> {
    match check_advance(pool, snapshot, amount, config) {
        Ok(()) => None,
        Err(err) => Some(constraint_of(&err)),
    }
}

fn constraint_of(err: &EngineError) -> ConstraintKind {
    match err {
        EngineError::PoolPaused(_) => ConstraintKind::PoolStatus,
        EngineError::AmountBelowMinimum { .. } => ConstraintKind::MinAdvance,
        EngineError::AmountAboveMaximum { .. } => ConstraintKind::MaxAdvance,
        EngineError::ExposureLimitExceeded { .. } => ConstraintKind::SingleAdvanceCeiling,
        EngineError::ReserveRatioViolation { .. }
        | EngineError::InsufficientEffectiveAvailable { .. } => {
            ConstraintKind::EffectiveAvailable
        }
        EngineError::FarmerLimitExceeded { .. } => ConstraintKind::FarmerExposure,
        EngineError::RiskTierMismatch { .. } => ConstraintKind::RiskTier,
        _ => ConstraintKind::EffectiveAvailable,
    }
}

/// Builds the read-only eligibility report for a pool.
pub(crate) fn eligibility(
    pool: &Pool,
    snapshot: &BalanceSnapshot,
    amount: Decimal,
    tier: RiskTier,
    farmer_exposure_headroom: Decimal,
    config: &EngineConfig,
) -> EligibilityReport {
    let mut failing = Vec::new();
    if !pool.accepts_allocations() {
        failing.push(ConstraintKind::PoolStatus);
    }
    if amount < pool.min_advance_amount {
        failing.push(ConstraintKind::MinAdvance);
    }
    if amount > pool.max_advance_amount {
        failing.push(ConstraintKind::MaxAdvance);
    }
    let ceiling = single_advance_ceiling(pool, config);
    if amount > ceiling {
        failing.push(ConstraintKind::SingleAdvanceCeiling);
    }
    if amount > snapshot.effective_available {
        failing.push(ConstraintKind::EffectiveAvailable);
    }
    if amount > farmer_exposure_headroom {
        failing.push(ConstraintKind::FarmerExposure);
    }
    if tier != pool.risk_tier {
        failing.push(ConstraintKind::RiskTier);
    }

    // the binding ceiling among the quantitative constraints; on ties the
    // earlier (stricter-to-lift) constraint governs
    let candidates = [
        (ConstraintKind::MaxAdvance, pool.max_advance_amount),
        (ConstraintKind::SingleAdvanceCeiling, ceiling),
        (ConstraintKind::EffectiveAvailable, snapshot.effective_available),
        (ConstraintKind::FarmerExposure, farmer_exposure_headroom),
    ];
    let (governing_constraint, max_allowed) = candidates
        .into_iter()
        .reduce(|best, next| if next.1 < best.1 { next } else { best })
        .expect("non-empty candidate list");

    EligibilityReport {
        pool_id: pool.id,
        eligible: failing.is_empty(),
        failing,
        max_allowed: max_allowed.max(Decimal::ZERO),
        governing_constraint,
    }
}
