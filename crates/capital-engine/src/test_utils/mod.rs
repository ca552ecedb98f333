//! Builders for exercising the engine in tests.

use crate::{
    accel::InProcessAccelerator, noop::NoopAccelerator, AllocationRequest, CapitalEngine,
    CreatePoolRequest, EngineConfig, PoolEngine, ReleaseRequest, ReleaseSource, ReleaseType,
    ReservationRequest,
};
use agrocap_primitives::{AllocationPriority, Pool, PoolId, RiskTier};
use agrocap_storage::MemoryLedger;
use rust_decimal::Decimal;

/// Engine over the in-memory ledger and the in-process accelerator.
pub fn test_engine() -> PoolEngine<MemoryLedger, InProcessAccelerator> {
    PoolEngine::in_memory()
}

/// Engine in degraded mode: no cache, no reservation registry.
pub fn degraded_engine() -> PoolEngine<MemoryLedger, NoopAccelerator> {
    PoolEngine::new(MemoryLedger::new(), NoopAccelerator::new(), EngineConfig::default())
}

/// A pool creation request with sensible test defaults: 1,000,000 MXN,
/// tier A, reserve floor 15%, advances between 5,000 and 100,000.
pub fn create_pool_request(initial_capital: i64) -> CreatePoolRequest {
    CreatePoolRequest {
        name: format!("test pool {initial_capital}"),
        description: None,
        currency: "MXN".to_owned(),
        risk_tier: RiskTier::A,
        initial_capital: Decimal::from(initial_capital),
        target_return_rate: Decimal::from(12),
        min_advance_amount: Some(Decimal::from(5_000)),
        max_advance_amount: Some(Decimal::from(100_000)),
        max_exposure_limit: None,
        min_reserve_ratio: Some(Decimal::from(15)),
        auto_rebalance_enabled: false,
        created_by: "tests".to_owned(),
    }
}

/// Creates a default test pool on `engine` and returns it.
pub async fn seeded_pool<E: CapitalEngine>(engine: &E, initial_capital: i64) -> Pool {
    engine
        .create_pool(create_pool_request(initial_capital))
        .await
        .expect("test pool creation")
}

/// An allocation request pinned to `pool_id`.
pub fn allocation_request(pool_id: PoolId, amount: i64) -> AllocationRequest {
    AllocationRequest {
        advance_id: format!("adv-{amount}"),
        farmer_id: "farmer-1".to_owned(),
        order_id: format!("order-{amount}"),
        requested_amount: Decimal::from(amount),
        currency: "MXN".to_owned(),
        risk_tier: RiskTier::A,
        credit_score: Some(700),
        preferred_pool_id: Some(pool_id),
        priority: AllocationPriority::LowestRisk,
    }
}

/// An unpinned allocation request that exercises pool selection.
pub fn selecting_request(amount: i64, priority: AllocationPriority) -> AllocationRequest {
    AllocationRequest {
        preferred_pool_id: None,
        priority,
        ..allocation_request(PoolId::random(), amount)
    }
}

/// A full-repayment release for `advance_id`.
pub fn full_repayment(
    pool_id: PoolId,
    advance_id: &str,
    principal: i64,
    fees: i64,
) -> ReleaseRequest {
    ReleaseRequest {
        pool_id,
        advance_id: advance_id.to_owned(),
        farmer_id: "farmer-1".to_owned(),
        release_type: ReleaseType::FullRepayment,
        source: ReleaseSource::BuyerPayment,
        principal: Decimal::from(principal),
        fees: Decimal::from(fees),
        penalties: Decimal::ZERO,
    }
}

/// A reservation request against `pool_id`.
pub fn reservation_request(pool_id: PoolId, amount: i64) -> ReservationRequest {
    ReservationRequest {
        pool_id,
        advance_id: format!("adv-hold-{amount}"),
        farmer_id: "farmer-1".to_owned(),
        amount: Decimal::from(amount),
        ttl_seconds: None,
    }
}
