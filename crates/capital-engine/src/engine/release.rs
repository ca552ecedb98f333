//! Capital release: repayments, recoveries and default-loss recognition.

use crate::{
    accel::Accelerator,
    engine::EngineInner,
    error::{EngineError, EngineResult},
    events::{BalanceChangeKind, BalanceEvent, RelatedEntityType},
    traits::{DefaultOutcome, LedgerReceipt, ReleaseRequest, ReleaseType},
};
use agrocap_primitives::{BalanceSnapshot, PoolId, TransactionType};
use agrocap_storage::{
    BalanceChange, CapitalDelta, CounterDelta, LedgerStore, NewTransaction, TransactionFilter,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{instrument, warn};

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Returns repaid capital to its pool, recognizing fee and penalty
    /// income in the same storage transaction.
    #[instrument(skip(self, req), fields(advance = %req.advance_id), target = "engine::release")]
    pub(crate) async fn release(&self, req: ReleaseRequest) -> EngineResult<LedgerReceipt> {
        validate_release_request(&req)?;
        let result = self
            .with_retries("release", || self.try_release(req.clone()))
            .await;
        if result.is_ok() {
            self.metrics().release_committed();
        }
        result
    }

    async fn try_release(&self, req: ReleaseRequest) -> EngineResult<LedgerReceipt> {
        let pool_id = req.pool_id;
        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(release_change(&req)).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;

        let record = committed
            .records
            .first()
            .ok_or_else(|| EngineError::internal("release committed without a record"))?;

        let holds = self
            .accel()
            .active_reservation_total(pool_id)
            .await
            .unwrap_or(Decimal::ZERO);
        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount: req.principal + req.fees + req.penalties,
            balance_before: (&BalanceSnapshot::compute(&committed.before, holds)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, holds)).into(),
            related_entity_id: Some(req.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: record.created_at,
        })
        .await;

        Ok(LedgerReceipt {
            pool_id,
            transaction_id: record.id,
            amount: req.principal,
            balance_before: record.balance_before,
            balance_after: committed.after.available_capital,
            committed_at: record.created_at,
        })
    }

    /// Recognizes a default loss. The only path allowed to leave the pool
    /// under its reserve floor; doing so raises a `HEALTH_WARNING` event.
    #[instrument(skip(self), fields(advance = advance_id), target = "engine::release")]
    pub(crate) async fn recognize_default(
        &self,
        advance_id: &str,
        pool_id: PoolId,
        defaulted_amount: Decimal,
        recovered_amount: Decimal,
    ) -> EngineResult<DefaultOutcome> {
        if defaulted_amount <= Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "defaulted amount must be positive".to_owned(),
            ));
        }
        if recovered_amount < Decimal::ZERO || recovered_amount > defaulted_amount {
            return Err(EngineError::ValidationError(
                "recovered amount must lie between zero and the defaulted amount".to_owned(),
            ));
        }

        let loss = defaulted_amount - recovered_amount;
        let farmer = self.farmer_of_advance(pool_id, advance_id).await;

        let advance = advance_id.to_owned();
        let outcome = self
            .with_retries("handle_default", || {
                self.try_recognize_default(
                    advance.clone(),
                    pool_id,
                    defaulted_amount,
                    recovered_amount,
                    farmer.clone(),
                )
            })
            .await?;
        self.metrics().default_recognized(loss);
        Ok(outcome)
    }

    async fn try_recognize_default(
        &self,
        advance_id: String,
        pool_id: PoolId,
        defaulted_amount: Decimal,
        recovered_amount: Decimal,
        farmer: Option<String>,
    ) -> EngineResult<DefaultOutcome> {
        let loss = defaulted_amount - recovered_amount;
        let change = BalanceChange {
            pool_id,
            capital: CapitalDelta {
                total: -loss,
                available: recovered_amount,
                deployed: -defaulted_amount,
                ..Default::default()
            },
            counters: CounterDelta {
                defaulted: 1,
                active: -1,
                recompute_default_rate: true,
                ..Default::default()
            },
            require_status: None,
            // loss recognition may cross the reserve floor
            enforce_reserve_floor: false,
            mark_allocation: false,
            farmer_exposure: farmer.map(|f| (f, -defaulted_amount)),
            records: vec![NewTransaction {
                txn_type: TransactionType::Adjustment,
                amount: -loss,
                available_effect: recovered_amount,
                description: format!("default write-off for advance {advance_id}"),
                metadata: json!({
                    "advanceId": advance_id,
                    "defaultedAmount": defaulted_amount,
                    "recoveredAmount": recovered_amount,
                    "loss": loss,
                }),
                related_advance_id: Some(advance_id.clone()),
                related_investor_id: None,
            }],
        };

        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(change).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;

        let record = committed
            .records
            .first()
            .ok_or_else(|| EngineError::internal("default committed without a record"))?;

        let before = BalanceSnapshot::compute(&committed.before, Decimal::ZERO);
        let after = BalanceSnapshot::compute(&committed.after, Decimal::ZERO);
        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount: -loss,
            balance_before: (&before).into(),
            balance_after: (&after).into(),
            related_entity_id: Some(advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Adjustment),
            timestamp: record.created_at,
        })
        .await;

        if committed.after.available_capital < committed.after.required_reserve() {
            warn!(
                target: "engine::release",
                pool = %pool_id,
                available = %committed.after.available_capital,
                required = %committed.after.required_reserve(),
                "default loss crossed the reserve floor"
            );
            self.publish_event(BalanceEvent {
                pool_id,
                change_type: BalanceChangeKind::HealthWarning,
                amount: loss,
                balance_before: (&before).into(),
                balance_after: (&after).into(),
                related_entity_id: Some(advance_id),
                related_entity_type: Some(RelatedEntityType::Adjustment),
                timestamp: record.created_at,
            })
            .await;
        }

        Ok(DefaultOutcome {
            pool_id,
            transaction_id: record.id,
            loss,
            recovered: recovered_amount,
            default_rate: committed.after.default_rate,
        })
    }

    /// Resolves the farmer of an advance from its disbursement record, for
    /// exposure cleanup. Best effort: a missing record only skips the
    /// cleanup.
    async fn farmer_of_advance(&self, pool_id: PoolId, advance_id: &str) -> Option<String> {
        let filter = TransactionFilter {
            pool_id: Some(pool_id),
            types: vec![TransactionType::AdvanceDisbursement],
            related_advance_id: Some(advance_id.to_owned()),
            limit: Some(1),
            ..Default::default()
        };
        let records = self.ledger().transactions(&filter).await.ok()?;
        records
            .first()
            .and_then(|r| r.metadata.get("farmerId"))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    }
}

/// Builds the guarded change for a repayment-shaped release.
fn release_change(req: &ReleaseRequest) -> BalanceChange {
    let income = req.fees + req.penalties;
    let returned = req.principal + income;

    // a recovery after write-off returns money to a pool whose deployed
    // capital no longer carries the advance
    let principal_leaves_deployed = req.release_type != ReleaseType::DefaultRecovery;
    let (deployed_delta, total_delta) = if principal_leaves_deployed {
        (-req.principal, income)
    } else {
        (Decimal::ZERO, returned)
    };

    let mut counters = CounterDelta {
        repaid: req.principal,
        fees_earned: income,
        ..Default::default()
    };
    if req.release_type == ReleaseType::FullRepayment {
        counters.completed = 1;
        counters.active = -1;
    }

    let metadata = json!({
        "advanceId": req.advance_id,
        "farmerId": req.farmer_id,
        "releaseType": req.release_type,
        "source": req.source,
        "principal": req.principal,
        "fees": req.fees,
        "penalties": req.penalties,
    });

    let mut records = vec![NewTransaction::crediting(
        TransactionType::AdvanceRepayment,
        req.principal,
        format!("repayment for advance {}", req.advance_id),
    )
    .with_metadata(metadata)
    .for_advance(req.advance_id.clone())];
    if req.fees > Decimal::ZERO {
        records.push(
            NewTransaction::crediting(
                TransactionType::FeeCollection,
                req.fees,
                format!("fee income for advance {}", req.advance_id),
            )
            .for_advance(req.advance_id.clone()),
        );
    }
    if req.penalties > Decimal::ZERO {
        records.push(
            NewTransaction::crediting(
                TransactionType::PenaltyFee,
                req.penalties,
                format!("penalty income for advance {}", req.advance_id),
            )
            .for_advance(req.advance_id.clone()),
        );
    }

    BalanceChange {
        pool_id: req.pool_id,
        capital: CapitalDelta {
            total: total_delta,
            available: returned,
            deployed: deployed_delta,
            ..Default::default()
        },
        counters,
        require_status: None,
        enforce_reserve_floor: true,
        mark_allocation: false,
        farmer_exposure: principal_leaves_deployed
            .then(|| (req.farmer_id.clone(), -req.principal)),
        records,
    }
}

fn validate_release_request(req: &ReleaseRequest) -> EngineResult<()> {
    if req.principal < Decimal::ZERO || req.fees < Decimal::ZERO || req.penalties < Decimal::ZERO
    {
        return Err(EngineError::ValidationError(
            "release amounts must not be negative".to_owned(),
        ));
    }
    if req.principal + req.fees + req.penalties <= Decimal::ZERO {
        return Err(EngineError::ValidationError(
            "release must move a positive amount".to_owned(),
        ));
    }
    if req.advance_id.trim().is_empty() {
        return Err(EngineError::ValidationError("advance identifier is required".to_owned()));
    }
    Ok(())
}
