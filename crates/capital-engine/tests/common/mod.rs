//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use agrocap_capital_engine::{
    accel::InProcessAccelerator, noop::NoopAccelerator, AllocationRequest, CapitalEngine,
    CreatePoolRequest, EngineConfig, PoolEngine, ReleaseRequest, ReleaseSource, ReleaseType,
    ReservationRequest,
};
use agrocap_primitives::{AllocationPriority, Pool, PoolId, RiskTier};
use agrocap_storage::MemoryLedger;
use rust_decimal::Decimal;

pub fn engine() -> PoolEngine<MemoryLedger, InProcessAccelerator> {
    PoolEngine::in_memory()
}

pub fn degraded_engine() -> PoolEngine<MemoryLedger, NoopAccelerator> {
    PoolEngine::new(MemoryLedger::new(), NoopAccelerator::new(), EngineConfig::default())
}

pub fn pool_request(initial_capital: i64) -> CreatePoolRequest {
    CreatePoolRequest {
        name: format!("pool-{initial_capital}"),
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

pub async fn seeded_pool<E: CapitalEngine>(engine: &E, initial_capital: i64) -> Pool {
    engine.create_pool(pool_request(initial_capital)).await.expect("pool creation")
}

pub fn allocation(pool_id: PoolId, advance_id: &str, amount: Decimal) -> AllocationRequest {
    AllocationRequest {
        advance_id: advance_id.to_owned(),
        farmer_id: "farmer-1".to_owned(),
        order_id: format!("order-{advance_id}"),
        requested_amount: amount,
        currency: "MXN".to_owned(),
        risk_tier: RiskTier::A,
        credit_score: Some(700),
        preferred_pool_id: Some(pool_id),
        priority: AllocationPriority::LowestRisk,
    }
}

pub fn selecting_allocation(amount: i64, priority: AllocationPriority) -> AllocationRequest {
    AllocationRequest {
        advance_id: format!("adv-select-{amount}"),
        farmer_id: "farmer-1".to_owned(),
        order_id: format!("order-select-{amount}"),
        requested_amount: Decimal::from(amount),
        currency: "MXN".to_owned(),
        risk_tier: RiskTier::A,
        credit_score: Some(700),
        preferred_pool_id: None,
        priority,
    }
}

pub fn repayment(
    pool_id: PoolId,
    advance_id: &str,
    release_type: ReleaseType,
    principal: i64,
    fees: i64,
    penalties: i64,
) -> ReleaseRequest {
    ReleaseRequest {
        pool_id,
        advance_id: advance_id.to_owned(),
        farmer_id: "farmer-1".to_owned(),
        release_type,
        source: ReleaseSource::BuyerPayment,
        principal: Decimal::from(principal),
        fees: Decimal::from(fees),
        penalties: Decimal::from(penalties),
    }
}

pub fn reservation(pool_id: PoolId, amount: i64, ttl_seconds: Option<u64>) -> ReservationRequest {
    ReservationRequest {
        pool_id,
        advance_id: format!("adv-hold-{amount}"),
        farmer_id: "farmer-1".to_owned(),
        amount: Decimal::from(amount),
        ttl_seconds,
    }
}
