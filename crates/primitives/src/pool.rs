//! The pool row: a unit of committed capital and its running counters.

use crate::{
    money::{percent_of, ratio_percent, round_rate},
    PoolId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    /// Accepting allocations and reservations.
    Active,
    /// Temporarily not accepting new allocations.
    Paused,
    /// Permanently closed; requires zero deployed and reserved capital.
    Closed,
    /// Winding down: releases are accepted, allocations are not.
    Liquidating,
}

/// Risk classification of a pool or an advance.
///
/// Selects the fee table row applied on disbursement.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
pub enum RiskTier {
    /// Lowest risk.
    A,
    /// Medium risk.
    B,
    /// Highest risk accepted by the platform.
    C,
}

/// Running advance counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceCounters {
    /// Advances ever disbursed from this pool.
    pub issued: u64,
    /// Advances fully repaid.
    pub completed: u64,
    /// Advances written off.
    pub defaulted: u64,
    /// Advances currently outstanding.
    pub active: u64,
}

/// A pool of committed capital.
///
/// Capital is split across three buckets whose sum always equals
/// `total_capital`: `available_capital` (deployable), `deployed_capital`
/// (outstanding in advances) and `reserved_capital` (ledger-side holds used
/// when no cache-side reservation registry is available). No bucket is ever
/// negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// Pool identifier.
    pub id: PoolId,
    /// Human-readable name.
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: PoolStatus,
    /// Risk classification.
    pub risk_tier: RiskTier,
    /// ISO currency code of every amount in this pool.
    pub currency: String,

    /// Committed capital.
    pub total_capital: Decimal,
    /// Capital deployable right now (before reserve and holds).
    pub available_capital: Decimal,
    /// Capital outstanding in active advances.
    pub deployed_capital: Decimal,
    /// Ledger-side reservation holds.
    pub reserved_capital: Decimal,

    /// Return the pool is underwritten to target, in percent.
    pub target_return_rate: Decimal,
    /// Realized return, in percent.
    pub actual_return_rate: Decimal,

    /// Smallest advance this pool funds.
    pub min_advance_amount: Decimal,
    /// Largest advance this pool funds.
    pub max_advance_amount: Decimal,
    /// Ceiling on any single borrower's outstanding exposure.
    pub max_exposure_limit: Decimal,
    /// Reserve floor as a percentage of total capital.
    pub min_reserve_ratio: Decimal,

    /// Advance counters.
    pub counters: AdvanceCounters,
    /// Principal ever disbursed.
    pub total_disbursed: Decimal,
    /// Principal ever repaid.
    pub total_repaid: Decimal,
    /// Fees and penalties ever collected.
    pub total_fees_earned: Decimal,
    /// `defaulted / max(issued, 1) × 100`, recomputed on every default.
    pub default_rate: Decimal,

    /// Whether the rebalancer may move capital into or out of this pool.
    pub auto_rebalance_enabled: bool,

    /// When this pool last won an allocation. Drives round-robin selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_allocation_at: Option<DateTime<Utc>>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Principal that created the pool.
    pub created_by: String,
}

impl Pool {
    /// The amount that must stay in `available_capital` outside of
    /// default-loss recognition: `total_capital × min_reserve_ratio / 100`.
    pub fn required_reserve(&self) -> Decimal {
        percent_of(self.total_capital, self.min_reserve_ratio)
    }

    /// `available_capital / total_capital` in percent.
    pub fn reserve_ratio(&self) -> Decimal {
        ratio_percent(self.available_capital, self.total_capital)
    }

    /// `deployed_capital / total_capital` in percent.
    pub fn utilization_rate(&self) -> Decimal {
        ratio_percent(self.deployed_capital, self.total_capital)
    }

    /// Recomputes `default_rate` from the counters.
    pub fn recompute_default_rate(&mut self) {
        let issued = self.counters.issued.max(1);
        self.default_rate = round_rate(
            Decimal::from(self.counters.defaulted) / Decimal::from(issued)
                * Decimal::ONE_HUNDRED,
        );
    }

    /// Whether the capital buckets sum to `total_capital` and none is
    /// negative. Checked at every commit point.
    pub fn capital_is_consistent(&self) -> bool {
        let non_negative = self.total_capital >= Decimal::ZERO
            && self.available_capital >= Decimal::ZERO
            && self.deployed_capital >= Decimal::ZERO
            && self.reserved_capital >= Decimal::ZERO;
        non_negative
            && self.available_capital + self.deployed_capital + self.reserved_capital
                == self.total_capital
    }

    /// Whether the pool accepts new allocations and reservations.
    pub fn accepts_allocations(&self) -> bool {
        self.status == PoolStatus::Active
    }
}
