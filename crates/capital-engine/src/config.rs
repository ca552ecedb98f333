//! Engine configuration and its defaults.

use agrocap_primitives::RiskTier;
use rust_decimal::Decimal;
use std::time::Duration;

/// Default TTL of a capital reservation.
pub const RESERVATION_TTL_DEFAULT: Duration = Duration::from_secs(300);

/// Default cadence of the reservation expiry sweep.
pub const RESERVATION_SWEEP_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);

/// Default TTL of a cached balance snapshot.
pub const SNAPSHOT_TTL_DEFAULT: Duration = Duration::from_secs(30);

/// Default TTL of the cached cross-pool summary.
pub const SUMMARY_TTL_DEFAULT: Duration = Duration::from_secs(60);

/// Default lease on the per-pool lock; expiry releases the lock even if the
/// holder died.
pub const LOCK_LEASE_DEFAULT: Duration = Duration::from_secs(10);

/// Default time budget for acquiring the per-pool lock.
pub const LOCK_ACQUIRE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// Bounded retry budget for retryable commit failures.
pub const COMMIT_ATTEMPTS_DEFAULT: u32 = 3;

/// Base delay of the jittered exponential retry backoff.
pub const RETRY_BACKOFF_BASE_DEFAULT: Duration = Duration::from_millis(50);

/// Fee rates for one risk tier, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRates {
    /// Charged to the farmer on disbursement.
    pub farmer: Decimal,
    /// Charged to the produce buyer.
    pub buyer: Decimal,
}

/// Per-tier fee table applied on disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTable {
    /// Tier A rates.
    pub a: FeeRates,
    /// Tier B rates.
    pub b: FeeRates,
    /// Tier C rates.
    pub c: FeeRates,
}

impl FeeTable {
    /// Rates for `tier`.
    pub fn rates(&self, tier: RiskTier) -> FeeRates {
        match tier {
            RiskTier::A => self.a,
            RiskTier::B => self.b,
            RiskTier::C => self.c,
        }
    }
}

impl Default for FeeTable {
    fn default() -> Self {
        Self {
            a: FeeRates { farmer: Decimal::new(200, 2), buyer: Decimal::new(100, 2) },
            b: FeeRates { farmer: Decimal::new(250, 2), buyer: Decimal::new(125, 2) },
            c: FeeRates { farmer: Decimal::new(350, 2), buyer: Decimal::new(175, 2) },
        }
    }
}

/// Weights of the `WEIGHTED` selection priority over normalized factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionWeights {
    /// Weight of the inverse default rate.
    pub risk: Decimal,
    /// Weight of normalized available capital.
    pub availability: Decimal,
    /// Weight of the normalized actual return rate.
    pub return_rate: Decimal,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            risk: Decimal::new(40, 2),
            availability: Decimal::new(35, 2),
            return_rate: Decimal::new(25, 2),
        }
    }
}

/// Tunables of the capital engine.
///
/// The defaults are the platform contract; deployments override individual
/// fields rather than rebuilding the struct.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reserve floor percentage applied to newly created pools.
    pub min_reserve_ratio: Decimal,
    /// A single advance may not exceed this share of total capital, in
    /// percent.
    pub max_single_advance_ratio: Decimal,
    /// Default minimum advance for new pools.
    pub min_advance_amount: Decimal,
    /// Default maximum advance for new pools.
    pub max_advance_amount: Decimal,
    /// Reservation TTL.
    pub reservation_ttl: Duration,
    /// Cadence of the expiry sweep; must not exceed the TTL.
    pub reservation_sweep_interval: Duration,
    /// Balance snapshot TTL.
    pub snapshot_ttl: Duration,
    /// Cross-pool summary TTL.
    pub summary_ttl: Duration,
    /// Per-pool lock lease.
    pub lock_lease: Duration,
    /// Per-pool lock acquire timeout.
    pub lock_acquire_timeout: Duration,
    /// Retry budget for retryable commit failures.
    pub commit_attempts: u32,
    /// Base delay of the jittered exponential backoff between attempts.
    pub retry_backoff_base: Duration,
    /// Default rate at which a pool's health is critical, in percent.
    pub critical_default_rate: Decimal,
    /// Default rate at which a pool's health degrades, in percent.
    pub warning_default_rate: Decimal,
    /// Default rate under which a pool is considered fully healthy.
    pub healthy_default_rate: Decimal,
    /// Utilization above which health reports flag the pool, in percent.
    pub max_utilization: Decimal,
    /// Disbursement fee table.
    pub fee_table: FeeTable,
    /// Weights of the `WEIGHTED` selection priority.
    pub selection_weights: SelectionWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_reserve_ratio: Decimal::from(15),
            max_single_advance_ratio: Decimal::from(10),
            min_advance_amount: Decimal::from(5_000),
            max_advance_amount: Decimal::from(500_000),
            reservation_ttl: RESERVATION_TTL_DEFAULT,
            reservation_sweep_interval: RESERVATION_SWEEP_INTERVAL_DEFAULT,
            snapshot_ttl: SNAPSHOT_TTL_DEFAULT,
            summary_ttl: SUMMARY_TTL_DEFAULT,
            lock_lease: LOCK_LEASE_DEFAULT,
            lock_acquire_timeout: LOCK_ACQUIRE_TIMEOUT_DEFAULT,
            commit_attempts: COMMIT_ATTEMPTS_DEFAULT,
            retry_backoff_base: RETRY_BACKOFF_BASE_DEFAULT,
            critical_default_rate: Decimal::from(10),
            warning_default_rate: Decimal::from(5),
            healthy_default_rate: Decimal::from(2),
            max_utilization: Decimal::from(85),
            fee_table: FeeTable::default(),
            selection_weights: SelectionWeights::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_table_defaults_are_the_platform_contract() {
        let table = FeeTable::default();
        assert_eq!(table.rates(RiskTier::A).farmer, Decimal::new(200, 2));
        assert_eq!(table.rates(RiskTier::A).buyer, Decimal::new(100, 2));
        assert_eq!(table.rates(RiskTier::B).farmer, Decimal::new(250, 2));
        assert_eq!(table.rates(RiskTier::B).buyer, Decimal::new(125, 2));
        assert_eq!(table.rates(RiskTier::C).farmer, Decimal::new(350, 2));
        assert_eq!(table.rates(RiskTier::C).buyer, Decimal::new(175, 2));
    }

    #[test]
    fn config_defaults_are_the_platform_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.min_reserve_ratio, Decimal::from(15));
        assert_eq!(config.max_single_advance_ratio, Decimal::from(10));
        assert_eq!(config.min_advance_amount, Decimal::from(5_000));
        assert_eq!(config.max_advance_amount, Decimal::from(500_000));
        assert_eq!(config.reservation_ttl, Duration::from_secs(300));
        assert_eq!(config.snapshot_ttl, Duration::from_secs(30));
        assert_eq!(config.summary_ttl, Duration::from_secs(60));
        assert_eq!(config.lock_lease, Duration::from_secs(10));
        assert_eq!(config.lock_acquire_timeout, Duration::from_secs(5));
        assert!(config.reservation_sweep_interval <= config.reservation_ttl);
    }
}
