//! Derived, cacheable balance views.

use crate::{money::round_money, Pool, PoolId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A point-in-time view of a pool's capital position.
///
/// Consistent for a single pool as of `timestamp`; snapshots of different
/// pools are not mutually ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    /// Pool this snapshot describes.
    pub pool_id: PoolId,
    /// Committed capital.
    pub total_capital: Decimal,
    /// Deployable capital before reserve and holds.
    pub available_capital: Decimal,
    /// Capital outstanding in advances.
    pub deployed_capital: Decimal,
    /// Ledger-side holds.
    pub reserved_capital: Decimal,
    /// `max(0, available − active holds − required reserve)`: the amount an
    /// allocation can actually take right now.
    pub effective_available: Decimal,
    /// `deployed / total` in percent.
    pub utilization_rate: Decimal,
    /// `available / total` in percent.
    pub reserve_ratio: Decimal,
    /// Whether the reserve floor currently holds.
    pub is_healthy: bool,
    /// When this view was computed.
    pub timestamp: DateTime<Utc>,
    /// Whether the cache served this view.
    pub from_cache: bool,
}

impl BalanceSnapshot {
    /// Computes a fresh snapshot from the pool row and the sum of active
    /// cache-side holds.
    pub fn compute(pool: &Pool, active_holds: Decimal) -> Self {
        let required_reserve = pool.required_reserve();
        let effective_available = round_money(
            (pool.available_capital - active_holds - required_reserve).max(Decimal::ZERO),
        );
        Self {
            pool_id: pool.id,
            total_capital: pool.total_capital,
            available_capital: pool.available_capital,
            deployed_capital: pool.deployed_capital,
            reserved_capital: pool.reserved_capital,
            effective_available,
            utilization_rate: pool.utilization_rate(),
            reserve_ratio: pool.reserve_ratio(),
            is_healthy: pool.available_capital >= required_reserve,
            timestamp: Utc::now(),
            from_cache: false,
        }
    }

    /// Marks this snapshot as served from cache.
    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdvanceCounters, PoolStatus, RiskTier};

    fn pool() -> Pool {
        Pool {
            id: PoolId::random(),
            name: "snapshot".to_owned(),
            description: None,
            status: PoolStatus::Active,
            risk_tier: RiskTier::A,
            currency: "MXN".to_owned(),
            total_capital: Decimal::from(1_000_000),
            available_capital: Decimal::from(950_000),
            deployed_capital: Decimal::from(50_000),
            reserved_capital: Decimal::ZERO,
            target_return_rate: Decimal::from(12),
            actual_return_rate: Decimal::ZERO,
            min_advance_amount: Decimal::from(5_000),
            max_advance_amount: Decimal::from(100_000),
            max_exposure_limit: Decimal::from(500_000),
            min_reserve_ratio: Decimal::from(15),
            counters: AdvanceCounters::default(),
            total_disbursed: Decimal::ZERO,
            total_repaid: Decimal::ZERO,
            total_fees_earned: Decimal::ZERO,
            default_rate: Decimal::ZERO,
            auto_rebalance_enabled: false,
            last_allocation_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: "tests".to_owned(),
        }
    }

    #[test]
    fn effective_available_subtracts_reserve_and_holds() {
        let snap = BalanceSnapshot::compute(&pool(), Decimal::from(100_000));
        // 950_000 − 100_000 holds − 150_000 reserve
        assert_eq!(snap.effective_available, Decimal::from(700_000));
        assert!(snap.is_healthy);
        assert!(!snap.from_cache);
    }

    #[test]
    fn effective_available_floors_at_zero() {
        let snap = BalanceSnapshot::compute(&pool(), Decimal::from(900_000));
        assert_eq!(snap.effective_available, Decimal::ZERO);
    }
}
