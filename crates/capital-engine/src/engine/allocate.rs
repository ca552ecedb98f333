//! Capital allocation: selection, validation, fees and the atomic deploy.

use crate::{
    accel::Accelerator,
    engine::EngineInner,
    error::{EngineError, EngineResult, PoolAlternative},
    events::{BalanceChangeKind, BalanceEvent, RelatedEntityType},
    selection::{self, Candidate},
    traits::{AllocationRequest, AllocationResult, FeeBreakdown},
    validate,
};
use agrocap_primitives::{
    money::percent_of, BalanceSnapshot, Pool, PoolId, PoolStatus, TransactionType,
};
use agrocap_storage::{
    BalanceChange, CapitalDelta, CommittedChange, CounterDelta, LedgerStore, NewTransaction,
    PoolFilter,
};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, instrument};

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Funds an advance. Retries retryable commit failures with backoff;
    /// every other failure surfaces to the caller.
    #[instrument(skip(self, req), fields(advance = %req.advance_id), target = "engine::allocate")]
    pub(crate) async fn allocate(&self, req: AllocationRequest) -> EngineResult<AllocationResult> {
        validate_allocation_request(&req)?;
        let result = self
            .with_retries("allocate", || self.try_allocate(req.clone()))
            .await;
        match &result {
            Ok(allocated) => self.metrics().allocation_committed(allocated.amount),
            Err(err) => self.metrics().allocation_failed(err.code()),
        }
        result
    }

    async fn try_allocate(&self, req: AllocationRequest) -> EngineResult<AllocationResult> {
        // pool selection; a pinned pool skips ranking but not validation
        let (pool, snapshot) = match req.preferred_pool_id {
            Some(id) => self.preferred_candidate(&req, id).await?,
            None => self.select_optimal(&req).await?,
        };
        let pool_id = pool.id;
        let amount = req.requested_amount;

        // fail cheap before contending for the lock
        validate::check_advance(&pool, &snapshot, amount, self.config())?;
        let exposure = self.ledger().farmer_exposure(pool_id, &req.farmer_id).await?;
        validate::check_farmer_exposure(&pool, &req.farmer_id, exposure, amount)?;

        let rates = self.config().fee_table.rates(req.risk_tier);
        let fees = FeeBreakdown {
            farmer_fee: percent_of(amount, rates.farmer),
            buyer_fee: percent_of(amount, rates.buyer),
        };

        // composite critical section: lease lock, then the store row lock
        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.allocate_locked(&req, pool_id, fees).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;

        let record = committed
            .records
            .first()
            .ok_or_else(|| EngineError::internal("disbursement committed without a record"))?;

        let holds = self
            .accel()
            .active_reservation_total(pool_id)
            .await
            .unwrap_or(Decimal::ZERO);
        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount,
            balance_before: (&BalanceSnapshot::compute(&committed.before, holds)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, holds)).into(),
            related_entity_id: Some(req.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: record.created_at,
        })
        .await;

        Ok(AllocationResult {
            pool_id,
            transaction_id: record.id,
            amount,
            fees,
            balance_before: record.balance_before,
            balance_after: record.balance_after,
            allocated_at: record.created_at,
        })
    }

    /// The in-lock half of an allocation: re-read, re-validate against
    /// live holds, commit.
    async fn allocate_locked(
        &self,
        req: &AllocationRequest,
        pool_id: PoolId,
        fees: FeeBreakdown,
    ) -> EngineResult<CommittedChange> {
        let snapshot = self.fresh_balance(pool_id).await?;
        let amount = req.requested_amount;
        if amount > snapshot.effective_available {
            // selection worked on a stale view; the retry loop re-selects
            debug!(
                target: "engine::allocate",
                pool = %pool_id,
                requested = %amount,
                effective = %snapshot.effective_available,
                "effective availability moved between selection and commit"
            );
            return Err(EngineError::ConcurrentMutation { pool_id });
        }

        let metadata = json!({
            "advanceId": req.advance_id,
            "farmerId": req.farmer_id,
            "orderId": req.order_id,
            "riskTier": req.risk_tier,
            "creditScore": req.credit_score,
            "farmerFee": fees.farmer_fee,
            "buyerFee": fees.buyer_fee,
        });
        let change = BalanceChange {
            pool_id,
            capital: CapitalDelta {
                available: -amount,
                deployed: amount,
                ..Default::default()
            },
            counters: CounterDelta {
                issued: 1,
                active: 1,
                disbursed: amount,
                ..Default::default()
            },
            require_status: Some(PoolStatus::Active),
            enforce_reserve_floor: true,
            mark_allocation: true,
            farmer_exposure: Some((req.farmer_id.clone(), amount)),
            records: vec![NewTransaction::debiting(
                TransactionType::AdvanceDisbursement,
                amount,
                format!("advance disbursement for order {}", req.order_id),
            )
            .with_metadata(metadata)
            .for_advance(req.advance_id.clone())],
        };
        self.commit_and_refresh(change).await
    }

    async fn preferred_candidate(
        &self,
        req: &AllocationRequest,
        pool_id: PoolId,
    ) -> EngineResult<(Pool, BalanceSnapshot)> {
        let pool = self.ledger().pool(pool_id).await?;
        if pool.currency != req.currency {
            return Err(EngineError::ValidationError(format!(
                "pool {pool_id} is denominated in {}, request is {}",
                pool.currency, req.currency
            )));
        }
        if pool.risk_tier != req.risk_tier {
            return Err(EngineError::RiskTierMismatch {
                pool_tier: pool.risk_tier,
                requested_tier: req.risk_tier,
            });
        }
        let snapshot = self.balance(pool_id).await?;
        Ok((pool, snapshot))
    }

    /// Ranks every active same-currency pool and takes the first that
    /// passes all funding constraints.
    async fn select_optimal(
        &self,
        req: &AllocationRequest,
    ) -> EngineResult<(Pool, BalanceSnapshot)> {
        let pools = self
            .ledger()
            .pools(&PoolFilter::active_in_currency(req.currency.clone()))
            .await?;
        let snapshots = join_all(pools.iter().map(|pool| self.balance(pool.id))).await;

        let candidates: Vec<Candidate> = pools
            .into_iter()
            .zip(snapshots)
            .filter_map(|(pool, snapshot)| {
                snapshot.ok().map(|snapshot| Candidate { pool, snapshot })
            })
            .collect();

        let ranked = selection::rank(
            candidates,
            req.priority,
            &self.config().selection_weights,
        );

        let amount = req.requested_amount;
        for candidate in &ranked {
            if validate::first_failing(&candidate.pool, &candidate.snapshot, amount, self.config())
                .is_none()
            {
                return Ok((candidate.pool.clone(), candidate.snapshot.clone()));
            }
        }

        let alternatives = ranked
            .iter()
            .take(3)
            .filter_map(|candidate| {
                validate::first_failing(
                    &candidate.pool,
                    &candidate.snapshot,
                    amount,
                    self.config(),
                )
                .map(|failing_constraint| PoolAlternative {
                    pool_id: candidate.pool.id,
                    name: candidate.pool.name.clone(),
                    failing_constraint,
                })
            })
            .collect();
        Err(EngineError::PoolNotFound { alternatives })
    }
}

fn validate_allocation_request(req: &AllocationRequest) -> EngineResult<()> {
    if req.requested_amount <= Decimal::ZERO {
        return Err(EngineError::ValidationError(
            "requested amount must be positive".to_owned(),
        ));
    }
    if req.currency.trim().is_empty() {
        return Err(EngineError::ValidationError("currency must not be empty".to_owned()));
    }
    if req.advance_id.trim().is_empty() || req.farmer_id.trim().is_empty() {
        return Err(EngineError::ValidationError(
            "advance and farmer identifiers are required".to_owned(),
        ));
    }
    Ok(())
}
