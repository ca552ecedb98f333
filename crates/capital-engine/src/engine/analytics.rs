//! Derived metrics: balances, summaries, performance and health.
//!
//! Pure computations over durable state; nothing here mutates a pool.

use crate::{
    accel::Accelerator,
    engine::EngineInner,
    error::EngineResult,
    traits::{FarmerExposure, HealthReport, HealthStatus, PerformanceReport, PoolsSummary},
};
use agrocap_primitives::{
    money::{ratio_percent, round_rate},
    BalanceSnapshot, PoolId, TransactionType,
};
use agrocap_storage::{LedgerStore, PoolFilter, TransactionFilter};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Balance views for several pools: one cache multi-get, then at most
    /// one store read covering all misses. Unknown ids are skipped.
    pub(crate) async fn balances(&self, pool_ids: &[PoolId]) -> EngineResult<Vec<BalanceSnapshot>> {
        let cached = match self.accel().snapshots(pool_ids).await {
            Ok(cached) => cached,
            Err(err) => {
                debug!(target: "engine::cache", %err, "snapshot multi-get failed");
                vec![None; pool_ids.len()]
            }
        };

        let misses: Vec<PoolId> = pool_ids
            .iter()
            .zip(&cached)
            .filter(|(_, hit)| hit.is_none())
            .map(|(id, _)| *id)
            .collect();

        let mut fetched: HashMap<PoolId, BalanceSnapshot> = HashMap::new();
        if !misses.is_empty() {
            let filter = PoolFilter { ids: Some(misses), ..Default::default() };
            for pool in self.ledger().pools(&filter).await? {
                let holds = self
                    .accel()
                    .active_reservation_total(pool.id)
                    .await
                    .unwrap_or(Decimal::ZERO);
                let snapshot = BalanceSnapshot::compute(&pool, holds);
                if let Err(err) =
                    self.accel().store_snapshot(&snapshot, self.config().snapshot_ttl).await
                {
                    debug!(target: "engine::cache", pool = %pool.id, %err, "snapshot store failed");
                }
                fetched.insert(pool.id, snapshot);
            }
        }

        Ok(pool_ids
            .iter()
            .zip(cached)
            .filter_map(|(id, hit)| hit.or_else(|| fetched.get(id).cloned()))
            .collect())
    }

    /// Aggregate across every pool, cached for the configured TTL.
    pub(crate) async fn summary(&self) -> EngineResult<PoolsSummary> {
        if let Some(cached) = self.cached_summary() {
            return Ok(cached);
        }

        let pools = self.ledger().pools(&PoolFilter::default()).await?;
        let mut summary = PoolsSummary {
            pool_count: pools.len() as u64,
            total_capital: Decimal::ZERO,
            available_capital: Decimal::ZERO,
            deployed_capital: Decimal::ZERO,
            reserved_capital: Decimal::ZERO,
            average_utilization: Decimal::ZERO,
            average_default_rate: Decimal::ZERO,
            by_status: HashMap::new(),
            by_tier: HashMap::new(),
            timestamp: Utc::now(),
        };

        let mut utilization_sum = Decimal::ZERO;
        let mut default_rate_sum = Decimal::ZERO;
        for pool in &pools {
            summary.total_capital += pool.total_capital;
            summary.available_capital += pool.available_capital;
            summary.deployed_capital += pool.deployed_capital;
            summary.reserved_capital += pool.reserved_capital;
            utilization_sum += pool.utilization_rate();
            default_rate_sum += pool.default_rate;
            *summary.by_status.entry(pool.status.to_string()).or_insert(0) += 1;
            *summary.by_tier.entry(pool.risk_tier.to_string()).or_insert(0) += 1;
        }
        if !pools.is_empty() {
            let count = Decimal::from(pools.len());
            summary.average_utilization = round_rate(utilization_sum / count);
            summary.average_default_rate = round_rate(default_rate_sum / count);
        }

        self.store_summary(&summary);
        Ok(summary)
    }

    /// Performance metrics over a date range, derived from the ledger.
    pub(crate) async fn performance(
        &self,
        pool_id: PoolId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<PerformanceReport> {
        let pool = self.ledger().pool(pool_id).await?;
        let filter = TransactionFilter {
            pool_id: Some(pool_id),
            from: Some(start),
            to: Some(end),
            ..Default::default()
        };
        let entries = self.ledger().transactions(&filter).await?;

        let mut disbursed = Decimal::ZERO;
        let mut repaid = Decimal::ZERO;
        let mut fees = Decimal::ZERO;
        let mut losses = Decimal::ZERO;
        let mut disbursement_count = 0u64;
        for entry in &entries {
            match entry.txn_type {
                TransactionType::AdvanceDisbursement => {
                    disbursed += entry.amount;
                    disbursement_count += 1;
                }
                TransactionType::AdvanceRepayment => repaid += entry.amount,
                TransactionType::FeeCollection
                | TransactionType::PenaltyFee
                | TransactionType::InterestDistribution => fees += entry.amount,
                TransactionType::Adjustment if entry.amount.is_sign_negative() => {
                    losses += -entry.amount
                }
                _ => {}
            }
        }

        let average_advance = if disbursement_count > 0 {
            round_rate(disbursed / Decimal::from(disbursement_count))
        } else {
            Decimal::ZERO
        };
        let completion_rate = ratio_percent(
            Decimal::from(pool.counters.completed),
            Decimal::from(pool.counters.issued.max(1)),
        );
        let gross_profit = fees - losses;
        let profit_margin = ratio_percent(gross_profit, disbursed);
        let days = Decimal::from((end - start).num_days().max(1));
        let annualized_roi = if pool.total_capital.is_zero() {
            Decimal::ZERO
        } else {
            round_rate(
                gross_profit / pool.total_capital * Decimal::from(365) / days
                    * Decimal::ONE_HUNDRED,
            )
        };

        let top = self.ledger().top_farmer_exposures(pool_id, 5).await?;
        let top_total: Decimal = top.iter().map(|(_, amount)| *amount).sum();
        let concentration_pct = ratio_percent(top_total, pool.deployed_capital);
        let top_farmer_exposures = top
            .into_iter()
            .map(|(farmer_id, amount)| FarmerExposure { farmer_id, amount })
            .collect();

        Ok(PerformanceReport {
            pool_id,
            period_start: start,
            period_end: end,
            total_disbursed: disbursed,
            total_repaid: repaid,
            total_fees: fees,
            total_losses: losses,
            advances_disbursed: disbursement_count,
            average_advance,
            completion_rate,
            default_rate: pool.default_rate,
            profit_margin,
            annualized_roi,
            top_farmer_exposures,
            concentration_pct,
        })
    }

    /// Weighted health score:
    /// `liquidity 0.30 + performance 0.35 + concentration 0.20 + activity 0.15`.
    pub(crate) async fn assess_health(&self, pool_id: PoolId) -> EngineResult<HealthReport> {
        let pool = self.ledger().pool(pool_id).await?;
        let snapshot = self.balance(pool_id).await?;
        let config = self.config();
        let hundred = Decimal::ONE_HUNDRED;

        let top = self.ledger().top_farmer_exposures(pool_id, 5).await?;
        let top_total: Decimal = top.iter().map(|(_, amount)| *amount).sum();
        let top_exposure_pct = ratio_percent(top_total, pool.deployed_capital);

        let liquidity = (snapshot.reserve_ratio * Decimal::from(5)).min(hundred);
        let performance =
            (hundred - pool.default_rate * Decimal::from(10)).max(Decimal::ZERO);
        let concentration =
            (hundred - top_exposure_pct * Decimal::from(2)).max(Decimal::ZERO);
        let activity =
            (Decimal::from(pool.counters.active) * Decimal::from(10)).min(hundred);

        let score = round_rate(
            liquidity * Decimal::new(30, 2)
                + performance * Decimal::new(35, 2)
                + concentration * Decimal::new(20, 2)
                + activity * Decimal::new(15, 2),
        );
        let status = if score >= Decimal::from(70) {
            HealthStatus::Healthy
        } else if score >= Decimal::from(40) {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };

        let mut flags = Vec::new();
        if pool.default_rate >= config.critical_default_rate {
            flags.push(format!("default rate {} is critical", pool.default_rate));
        } else if pool.default_rate >= config.warning_default_rate {
            flags.push(format!("default rate {} is elevated", pool.default_rate));
        }
        if snapshot.utilization_rate > config.max_utilization {
            flags.push(format!(
                "utilization {} exceeds the {} ceiling",
                snapshot.utilization_rate, config.max_utilization
            ));
        }
        if !snapshot.is_healthy {
            flags.push("available capital is under the reserve floor".to_owned());
        }

        Ok(HealthReport {
            pool_id,
            score,
            status,
            liquidity,
            performance,
            concentration,
            activity,
            flags,
        })
    }
}
