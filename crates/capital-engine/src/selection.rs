//! Pool candidate ranking.
//!
//! Selection is a pure function over the candidate set: filter upstream,
//! rank here, then take the first candidate whose effective availability
//! covers the request. Determinism matters — ties always break toward the
//! lexicographically smaller pool id so repeated requests under identical
//! state pick the same pool.

use crate::config::SelectionWeights;
use agrocap_primitives::{AllocationPriority, BalanceSnapshot, Pool};
use rust_decimal::Decimal;

/// A pool under consideration together with its current balance view.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) pool: Pool,
    pub(crate) snapshot: BalanceSnapshot,
}

/// Orders candidates best-first for `priority`.
pub(crate) fn rank(
    mut candidates: Vec<Candidate>,
    priority: AllocationPriority,
    weights: &SelectionWeights,
) -> Vec<Candidate> {
    match priority {
        AllocationPriority::LowestRisk => {
            candidates.sort_by(|a, b| {
                a.pool
                    .default_rate
                    .cmp(&b.pool.default_rate)
                    .then_with(|| b.pool.available_capital.cmp(&a.pool.available_capital))
                    .then_with(|| a.pool.id.cmp(&b.pool.id))
            });
        }
        AllocationPriority::HighestAvailable => {
            candidates.sort_by(|a, b| {
                b.pool
                    .available_capital
                    .cmp(&a.pool.available_capital)
                    .then_with(|| a.pool.id.cmp(&b.pool.id))
            });
        }
        AllocationPriority::BestReturn => {
            candidates.sort_by(|a, b| {
                b.pool
                    .actual_return_rate
                    .cmp(&a.pool.actual_return_rate)
                    .then_with(|| a.pool.id.cmp(&b.pool.id))
            });
        }
        AllocationPriority::RoundRobin => {
            // never-allocated pools sort first (None < Some)
            candidates.sort_by(|a, b| {
                a.pool
                    .last_allocation_at
                    .cmp(&b.pool.last_allocation_at)
                    .then_with(|| a.pool.id.cmp(&b.pool.id))
            });
        }
        AllocationPriority::Weighted => {
            let max_available = candidates
                .iter()
                .map(|c| c.pool.available_capital)
                .max()
                .unwrap_or(Decimal::ONE)
                .max(Decimal::ONE);
            let max_return = candidates
                .iter()
                .map(|c| c.pool.actual_return_rate)
                .max()
                .unwrap_or(Decimal::ONE)
                .max(Decimal::ONE);

            let mut scored: Vec<(Decimal, Candidate)> = candidates
                .into_iter()
                .map(|c| (weighted_score(&c.pool, weights, max_available, max_return), c))
                .collect();
            scored.sort_by(|a, b| {
                b.0.cmp(&a.0).then_with(|| a.1.pool.id.cmp(&b.1.pool.id))
            });
            return scored.into_iter().map(|(_, c)| c).collect();
        }
    }
    candidates
}

/// Composite score: inverse risk, normalized availability, normalized
/// return, each weighted by configuration.
fn weighted_score(
    pool: &Pool,
    weights: &SelectionWeights,
    max_available: Decimal,
    max_return: Decimal,
) -> Decimal {
    let risk_factor = Decimal::ONE / (Decimal::ONE + pool.default_rate);
    let availability_factor = pool.available_capital / max_available;
    let return_factor = pool.actual_return_rate / max_return;
    weights.risk * risk_factor
        + weights.availability * availability_factor
        + weights.return_rate * return_factor
}

/// First candidate able to fund `amount`, by rank.
pub(crate) fn first_fit(
    ranked: &[Candidate],
    amount: Decimal,
) -> Option<&Candidate> {
    ranked.iter().find(|c| c.snapshot.effective_available >= amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrocap_primitives::{AdvanceCounters, PoolId, PoolStatus, RiskTier};
    use chrono::Utc;

    fn candidate(default_rate: i64, available: i64, return_rate: i64) -> Candidate {
        let now = Utc::now();
        let pool = Pool {
            id: PoolId::random(),
            name: format!("pool-{default_rate}-{available}"),
            description: None,
            status: PoolStatus::Active,
            risk_tier: RiskTier::A,
            currency: "MXN".to_owned(),
            total_capital: Decimal::from(available * 2),
            available_capital: Decimal::from(available),
            deployed_capital: Decimal::from(available),
            reserved_capital: Decimal::ZERO,
            target_return_rate: Decimal::from(12),
            actual_return_rate: Decimal::from(return_rate),
            min_advance_amount: Decimal::from(1_000),
            max_advance_amount: Decimal::from(available),
            max_exposure_limit: Decimal::from(available),
            min_reserve_ratio: Decimal::ZERO,
            counters: AdvanceCounters::default(),
            total_disbursed: Decimal::ZERO,
            total_repaid: Decimal::ZERO,
            total_fees_earned: Decimal::ZERO,
            default_rate: Decimal::new(default_rate, 1),
            auto_rebalance_enabled: false,
            last_allocation_at: None,
            created_at: now,
            updated_at: now,
            created_by: "tests".to_owned(),
        };
        let snapshot = BalanceSnapshot::compute(&pool, Decimal::ZERO);
        Candidate { pool, snapshot }
    }

    #[test]
    fn lowest_risk_prefers_the_smallest_default_rate() {
        // default rates 1.0%, 3.0%, 0.5%
        let ranked = rank(
            vec![candidate(10, 500, 5), candidate(30, 900, 9), candidate(5, 100, 2)],
            AllocationPriority::LowestRisk,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.default_rate, Decimal::new(5, 1));
        assert_eq!(ranked[2].pool.default_rate, Decimal::new(30, 1));
    }

    #[test]
    fn lowest_risk_ties_break_by_available_then_id() {
        let a = candidate(10, 500, 5);
        let b = candidate(10, 900, 5);
        let ranked = rank(
            vec![a, b],
            AllocationPriority::LowestRisk,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.available_capital, Decimal::from(900));

        let mut c = candidate(10, 500, 5);
        let mut d = candidate(10, 500, 5);
        // force a known id order
        if c.pool.id > d.pool.id {
            std::mem::swap(&mut c, &mut d);
        }
        let expected = c.pool.id;
        let ranked = rank(
            vec![d, c],
            AllocationPriority::LowestRisk,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.id, expected);
    }

    #[test]
    fn highest_available_and_best_return_sort_descending() {
        let ranked = rank(
            vec![candidate(10, 500, 5), candidate(10, 900, 9)],
            AllocationPriority::HighestAvailable,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.available_capital, Decimal::from(900));

        let ranked = rank(
            vec![candidate(10, 500, 5), candidate(10, 900, 9)],
            AllocationPriority::BestReturn,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.actual_return_rate, Decimal::from(9));
    }

    #[test]
    fn round_robin_puts_never_allocated_first() {
        let mut stale = candidate(10, 500, 5);
        stale.pool.last_allocation_at = Some(Utc::now());
        let fresh = candidate(10, 400, 5);
        let expected = fresh.pool.id;

        let ranked = rank(
            vec![stale, fresh],
            AllocationPriority::RoundRobin,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.id, expected);
    }

    #[test]
    fn weighted_balances_risk_against_availability() {
        // a riskier pool with far more capital can still win
        let risky_rich = candidate(50, 1_000_000, 10);
        let safe_poor = candidate(0, 1_000, 1);
        let rich_id = risky_rich.pool.id;

        let ranked = rank(
            vec![safe_poor, risky_rich],
            AllocationPriority::Weighted,
            &SelectionWeights::default(),
        );
        assert_eq!(ranked[0].pool.id, rich_id);
    }

    #[test]
    fn first_fit_skips_candidates_without_headroom() {
        let ranked = rank(
            vec![candidate(5, 100, 5), candidate(10, 900, 5)],
            AllocationPriority::LowestRisk,
            &SelectionWeights::default(),
        );
        // best-ranked pool cannot fund 500, the next one can
        let winner = first_fit(&ranked, Decimal::from(500)).unwrap();
        assert_eq!(winner.pool.available_capital, Decimal::from(900));
        assert!(first_fit(&ranked, Decimal::from(10_000)).is_none());
    }
}
