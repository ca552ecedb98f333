//! Pool administration: CRUD, lifecycle transitions and investor capital
//! movements.

use crate::{
    accel::Accelerator,
    engine::EngineInner,
    error::{EngineError, EngineResult},
    events::{BalanceChangeKind, BalanceEvent, RelatedEntityType},
    traits::{CreatePoolRequest, LedgerReceipt, PoolBalanceUpdate},
    validate::{self, EligibilityReport},
};
use agrocap_primitives::{
    money::{percent_of, round_money},
    AdvanceCounters, BalanceSnapshot, Pool, PoolId, PoolStatus, RiskTier, TransactionType,
};
use agrocap_storage::{
    BalanceChange, CapitalDelta, CommittedChange, CounterDelta, LedgerStore, NewTransaction,
    PoolConfigUpdate,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Creates a pool and writes its opening `CAPITAL_DEPOSIT` in one
    /// storage transaction.
    #[instrument(skip(self, req), fields(name = %req.name), target = "engine::admin")]
    pub(crate) async fn create_pool(&self, req: CreatePoolRequest) -> EngineResult<Pool> {
        validate_create_pool(&req)?;
        let config = self.config();
        let now = Utc::now();
        let initial = round_money(req.initial_capital);
        let pool = Pool {
            id: PoolId::random(),
            name: req.name,
            description: req.description,
            status: PoolStatus::Active,
            risk_tier: req.risk_tier,
            currency: req.currency,
            total_capital: initial,
            available_capital: initial,
            deployed_capital: Decimal::ZERO,
            reserved_capital: Decimal::ZERO,
            target_return_rate: req.target_return_rate,
            actual_return_rate: Decimal::ZERO,
            min_advance_amount: req.min_advance_amount.unwrap_or(config.min_advance_amount),
            max_advance_amount: req.max_advance_amount.unwrap_or(config.max_advance_amount),
            max_exposure_limit: req.max_exposure_limit.unwrap_or(initial),
            min_reserve_ratio: req.min_reserve_ratio.unwrap_or(config.min_reserve_ratio),
            counters: AdvanceCounters::default(),
            total_disbursed: Decimal::ZERO,
            total_repaid: Decimal::ZERO,
            total_fees_earned: Decimal::ZERO,
            default_rate: Decimal::ZERO,
            auto_rebalance_enabled: req.auto_rebalance_enabled,
            last_allocation_at: None,
            created_at: now,
            updated_at: now,
            created_by: req.created_by.clone(),
        };
        if pool.min_advance_amount > pool.max_advance_amount {
            return Err(EngineError::ValidationError(
                "minimum advance exceeds maximum advance".to_owned(),
            ));
        }

        let opening = NewTransaction::crediting(
            TransactionType::CapitalDeposit,
            initial,
            "initial capital deposit",
        )
        .with_metadata(json!({ "createdBy": req.created_by }));
        let pool = self.ledger().insert_pool(pool, opening).await?;
        info!(target: "engine::admin", pool = %pool.id, capital = %initial, "pool created");
        Ok(pool)
    }

    /// Applies a configuration-only update, validating lifecycle
    /// transitions. Raising the reserve floor past the pool's current
    /// ratio is accepted; callers are expected to pause the pool.
    #[instrument(skip(self, update), target = "engine::admin")]
    pub(crate) async fn update_pool(
        &self,
        pool_id: PoolId,
        update: PoolConfigUpdate,
    ) -> EngineResult<Pool> {
        let current = self.ledger().pool(pool_id).await?;

        if let Some(next_status) = update.status {
            validate_transition(&current, next_status)?;
        }
        let min = update.min_advance_amount.unwrap_or(current.min_advance_amount);
        let max = update.max_advance_amount.unwrap_or(current.max_advance_amount);
        if min > max {
            return Err(EngineError::ValidationError(
                "minimum advance exceeds maximum advance".to_owned(),
            ));
        }
        if let Some(ratio) = update.min_reserve_ratio {
            if ratio < Decimal::ZERO || ratio >= Decimal::ONE_HUNDRED {
                return Err(EngineError::ValidationError(
                    "reserve ratio must lie in [0, 100)".to_owned(),
                ));
            }
        }

        let updated = self.ledger().update_pool_config(pool_id, update).await?;
        // configuration shifts the derived views
        if let Err(err) = self.accel().invalidate(pool_id).await {
            tracing::debug!(target: "engine::admin", pool = %pool_id, %err, "invalidate failed");
        }
        Ok(updated)
    }

    /// Read-only probe of the funding constraints.
    pub(crate) async fn check_advance_eligibility(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        tier: RiskTier,
    ) -> EngineResult<EligibilityReport> {
        let pool = self.ledger().pool(pool_id).await?;
        let snapshot = self.balance(pool_id).await?;
        // headroom for a farmer with no current exposure; per-farmer limits
        // are enforced during allocation where the farmer is known
        let headroom = pool.max_exposure_limit;
        Ok(validate::eligibility(&pool, &snapshot, amount, tier, headroom, self.config()))
    }

    /// Credits investor capital.
    pub(crate) async fn deposit_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        require_positive(amount)?;
        let investor = investor_id.to_owned();
        let receipt = self
            .with_retries("deposit_capital", || {
                self.commit_investor_movement(
                    pool_id,
                    CapitalDelta { total: amount, available: amount, ..Default::default() },
                    NewTransaction::crediting(
                        TransactionType::CapitalDeposit,
                        amount,
                        format!("capital deposit by {investor}"),
                    )
                    .for_investor(investor.clone()),
                    false,
                )
            })
            .await?;
        Ok(receipt)
    }

    /// Withdraws investor capital. The reserve floor and active holds are
    /// both honored: withdrawal is capped by the effective availability.
    pub(crate) async fn withdraw_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        require_positive(amount)?;
        let investor = investor_id.to_owned();
        self.with_retries("withdraw_capital", || {
            self.try_withdraw(pool_id, amount, investor.clone())
        })
        .await
    }

    async fn try_withdraw(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor: String,
    ) -> EngineResult<LedgerReceipt> {
        let snapshot = self.fresh_balance(pool_id).await?;
        if amount > snapshot.effective_available {
            return Err(EngineError::InsufficientEffectiveAvailable {
                requested: amount,
                effective_available: snapshot.effective_available,
            });
        }
        let pool = self.ledger().pool(pool_id).await?;
        let available_after = pool.available_capital - amount;
        let required_after = percent_of(pool.total_capital - amount, pool.min_reserve_ratio);
        if available_after < required_after {
            return Err(EngineError::ReserveRatioViolation {
                available_after,
                required_reserve: required_after,
            });
        }

        self.commit_investor_movement(
            pool_id,
            CapitalDelta { total: -amount, available: -amount, ..Default::default() },
            NewTransaction::debiting(
                TransactionType::CapitalWithdrawal,
                amount,
                format!("capital withdrawal by {investor}"),
            )
            .for_investor(investor),
            false,
        )
        .await
    }

    /// Credits interest earnings to the pool.
    pub(crate) async fn distribute_interest(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        require_positive(amount)?;
        let investor = investor_id.to_owned();
        self.with_retries("distribute_interest", || {
            self.commit_investor_movement(
                pool_id,
                CapitalDelta { total: amount, available: amount, ..Default::default() },
                NewTransaction::crediting(
                    TransactionType::InterestDistribution,
                    amount,
                    format!("interest distribution for {investor}"),
                )
                .for_investor(investor.clone()),
                true,
            )
        })
        .await
    }

    async fn commit_investor_movement(
        &self,
        pool_id: PoolId,
        capital: CapitalDelta,
        record: NewTransaction,
        counts_as_fees: bool,
    ) -> EngineResult<LedgerReceipt> {
        let investor = record.related_investor_id.clone();
        let amount = record.amount;
        let change = BalanceChange {
            pool_id,
            capital,
            counters: CounterDelta {
                fees_earned: if counts_as_fees { amount } else { Decimal::ZERO },
                ..Default::default()
            },
            require_status: None,
            enforce_reserve_floor: true,
            mark_allocation: false,
            farmer_exposure: None,
            records: vec![record],
        };

        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(change).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;

        let receipt = receipt_of(&committed, amount)?;
        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount: capital.available,
            balance_before: (&BalanceSnapshot::compute(&committed.before, Decimal::ZERO)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, Decimal::ZERO)).into(),
            related_entity_id: investor,
            related_entity_type: Some(RelatedEntityType::Investor),
            timestamp: receipt.committed_at,
        })
        .await;
        Ok(receipt)
    }

    /// Multi-pool balance adjustment. Atomic mode commits all-or-nothing
    /// with locks taken in ascending pool-id order by the store.
    pub(crate) async fn batch_update_balances(
        &self,
        updates: Vec<PoolBalanceUpdate>,
        atomic: bool,
    ) -> EngineResult<Vec<EngineResult<LedgerReceipt>>> {
        for update in &updates {
            if !update.delta.conserves_capital() {
                return Err(EngineError::ValidationError(format!(
                    "unbalanced delta for pool {}",
                    update.pool_id
                )));
            }
        }

        let changes: Vec<BalanceChange> = updates
            .iter()
            .map(|update| BalanceChange {
                pool_id: update.pool_id,
                capital: update.delta,
                counters: CounterDelta::default(),
                require_status: None,
                enforce_reserve_floor: true,
                mark_allocation: false,
                farmer_exposure: None,
                records: vec![NewTransaction {
                    txn_type: TransactionType::Adjustment,
                    amount: update.delta.total,
                    available_effect: update.delta.available,
                    description: update.description.clone(),
                    metadata: serde_json::Value::Null,
                    related_advance_id: None,
                    related_investor_id: None,
                }],
            })
            .collect();

        let outcomes = self.ledger().commit_batch(changes, atomic).await?;
        let mut receipts = Vec::with_capacity(outcomes.len());
        for (outcome, update) in outcomes.into_iter().zip(&updates) {
            match outcome {
                Ok(committed) => {
                    if let Err(err) = self.accel().invalidate(update.pool_id).await {
                        tracing::debug!(
                            target: "engine::admin",
                            pool = %update.pool_id,
                            %err,
                            "invalidate failed"
                        );
                    }
                    receipts.push(receipt_of(&committed, update.delta.total));
                }
                Err(err) => receipts.push(Err(err.into())),
            }
        }
        Ok(receipts)
    }
}

fn receipt_of(committed: &CommittedChange, amount: Decimal) -> EngineResult<LedgerReceipt> {
    let record = committed
        .records
        .first()
        .ok_or_else(|| EngineError::internal("change committed without a record"))?;
    Ok(LedgerReceipt {
        pool_id: committed.after.id,
        transaction_id: record.id,
        amount,
        balance_before: record.balance_before,
        balance_after: committed.after.available_capital,
        committed_at: record.created_at,
    })
}

fn require_positive(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::ValidationError("amount must be positive".to_owned()));
    }
    Ok(())
}

fn validate_create_pool(req: &CreatePoolRequest) -> EngineResult<()> {
    if req.initial_capital <= Decimal::ZERO {
        return Err(EngineError::ValidationError(
            "initial capital must be positive".to_owned(),
        ));
    }
    if req.name.trim().is_empty() {
        return Err(EngineError::ValidationError("pool name must not be empty".to_owned()));
    }
    if req.currency.trim().is_empty() {
        return Err(EngineError::ValidationError("currency must not be empty".to_owned()));
    }
    if let Some(ratio) = req.min_reserve_ratio {
        if ratio < Decimal::ZERO || ratio >= Decimal::ONE_HUNDRED {
            return Err(EngineError::ValidationError(
                "reserve ratio must lie in [0, 100)".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Lifecycle transition rules. Closing requires every peso back in the
/// available bucket; liquidating pools may still receive releases.
fn validate_transition(pool: &Pool, next: PoolStatus) -> EngineResult<()> {
    if pool.status == next {
        return Ok(());
    }
    match next {
        PoolStatus::Closed => {
            if !pool.deployed_capital.is_zero() || !pool.reserved_capital.is_zero() {
                return Err(EngineError::ValidationError(format!(
                    "cannot close pool {} with {} deployed and {} reserved",
                    pool.id, pool.deployed_capital, pool.reserved_capital
                )));
            }
            Ok(())
        }
        _ if pool.status == PoolStatus::Closed => Err(EngineError::ValidationError(
            format!("pool {} is closed", pool.id),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pool_with(status: PoolStatus, deployed: i64) -> Pool {
        let now = Utc::now();
        Pool {
            id: PoolId::random(),
            name: "transitions".to_owned(),
            description: None,
            status,
            risk_tier: RiskTier::B,
            currency: "MXN".to_owned(),
            total_capital: Decimal::from(100_000),
            available_capital: Decimal::from(100_000 - deployed),
            deployed_capital: Decimal::from(deployed),
            reserved_capital: Decimal::ZERO,
            target_return_rate: Decimal::from(12),
            actual_return_rate: Decimal::ZERO,
            min_advance_amount: Decimal::from(5_000),
            max_advance_amount: Decimal::from(50_000),
            max_exposure_limit: Decimal::from(50_000),
            min_reserve_ratio: Decimal::from(15),
            counters: AdvanceCounters::default(),
            total_disbursed: Decimal::ZERO,
            total_repaid: Decimal::ZERO,
            total_fees_earned: Decimal::ZERO,
            default_rate: Decimal::ZERO,
            auto_rebalance_enabled: false,
            last_allocation_at: None,
            created_at: now,
            updated_at: now,
            created_by: "tests".to_owned(),
        }
    }

    #[test]
    fn closing_requires_all_capital_back() {
        let deployed = pool_with(PoolStatus::Active, 10_000);
        assert!(validate_transition(&deployed, PoolStatus::Closed).is_err());

        let idle = pool_with(PoolStatus::Liquidating, 0);
        assert!(validate_transition(&idle, PoolStatus::Closed).is_ok());
    }

    #[test]
    fn closed_pools_stay_closed() {
        let closed = pool_with(PoolStatus::Closed, 0);
        assert!(validate_transition(&closed, PoolStatus::Active).is_err());
        assert!(validate_transition(&closed, PoolStatus::Closed).is_ok());
    }
}
