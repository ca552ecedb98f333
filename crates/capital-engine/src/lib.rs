#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! The agrocap capital engine.
//!
//! This crate manages pools of committed capital and atomically allocates,
//! reserves, releases and loss-adjusts that capital against agricultural
//! cash-flow advances.
//!
//! ## Functionality
//!
//! The engine is responsible for
//!
//!    - pool lifecycle: creation, configuration updates, status transitions
//!    - capital allocation with pool selection and constraint validation
//!    - two-phase capital reservations with TTL expiry
//!    - repayment, recovery and default-loss accounting
//!    - real-time balance views, performance and health metrics
//!    - balance-change event publication, in-process and cross-process
//!
//! ## Assumptions
//!
//! ### Storage
//!
//! Durable state lives behind the
//! [`LedgerStore`](agrocap_storage::LedgerStore) trait: pool rows plus an
//! append-only transaction log, mutated only through declarative, guarded
//! balance changes applied under a row-level lock. The engine never touches
//! a balance outside that path, so the capital equation
//! `total = available + deployed + reserved` holds at every commit point
//! and no bucket ever goes negative.
//!
//! ### The accelerator
//!
//! Everything ephemeral — cached balance snapshots, capital reservations,
//! per-pool lease locks, cross-process publication — sits behind the
//! [`Accelerator`](crate::accel::Accelerator) capability. A deployment
//! without a shared cache runs the [`NoopAccelerator`](crate::noop) and
//! keeps full correctness: reads fall through to the store and
//! reservations are materialized as ledger-side reserved capital.
//!
//! ### Locking
//!
//! Every balance mutation runs inside the composite critical section: the
//! accelerator's per-pool lease lock first, then the store's row lock.
//! Lease release is token-checked so a holder whose lease expired cannot
//! release the next holder's lock. Retryable conflicts
//! (`ConcurrentMutation`, `LockUnavailable`) are retried internally with
//! jittered backoff before they surface.
//!
//! ## Architecture
//!
//! The engine is made up of two layers: an inner engine owns the stores,
//! listeners and commit pipeline, and the cloneable [`PoolEngine`] handle
//! is an `Arc` around it implementing the caller-facing [`CapitalEngine`]
//! trait.
//!
//! ## Examples
//!
//! Create a pool, fund an advance and watch the balance events:
//!
//! ```no_run
//! use agrocap_capital_engine::{CapitalEngine, PoolEngine, CreatePoolRequest, AllocationRequest};
//! use agrocap_primitives::{AllocationPriority, RiskTier};
//! use rust_decimal::Decimal;
//!
//! # async fn demo() -> agrocap_capital_engine::EngineResult<()> {
//! let engine = PoolEngine::in_memory();
//! let mut events = engine.subscribe_all();
//!
//! let pool = engine
//!     .create_pool(CreatePoolRequest {
//!         name: "MXN growers".to_owned(),
//!         description: None,
//!         currency: "MXN".to_owned(),
//!         risk_tier: RiskTier::A,
//!         initial_capital: Decimal::from(1_000_000),
//!         target_return_rate: Decimal::from(12),
//!         min_advance_amount: None,
//!         max_advance_amount: None,
//!         max_exposure_limit: None,
//!         min_reserve_ratio: None,
//!         auto_rebalance_enabled: false,
//!         created_by: "ops".to_owned(),
//!     })
//!     .await?;
//!
//! let allocated = engine
//!     .allocate_capital(AllocationRequest {
//!         advance_id: "adv-1".to_owned(),
//!         farmer_id: "farmer-1".to_owned(),
//!         order_id: "order-1".to_owned(),
//!         requested_amount: Decimal::from(50_000),
//!         currency: "MXN".to_owned(),
//!         risk_tier: RiskTier::A,
//!         credit_score: Some(710),
//!         preferred_pool_id: Some(pool.id),
//!         priority: AllocationPriority::LowestRisk,
//!     })
//!     .await?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("balance change: {:?}", event.change_type);
//!     }
//! });
//! # let _ = allocated;
//! # Ok(())
//! # }
//! ```
//!
//! Spawn the maintenance task that expires overdue reservations:
//!
//! ```no_run
//! use agrocap_capital_engine::{maintain::spawn_reservation_sweeper, PoolEngine};
//!
//! # fn demo() {
//! let engine = PoolEngine::in_memory();
//! let _sweeper = spawn_reservation_sweeper(engine);
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export pool and request builders for testing

use crate::{accel::Accelerator, engine::EngineInner};
use agrocap_primitives::{
    BalanceSnapshot, Pool, PoolId, PoolTransaction, Reservation, ReservationId, RiskTier,
};
use agrocap_storage::{
    LedgerStore, MemoryLedger, PoolConfigUpdate, PoolFilter, TransactionFilter,
    TransactionSummary,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::{fmt, sync::Arc};

pub use crate::{
    config::{
        EngineConfig, FeeRates, FeeTable, SelectionWeights, COMMIT_ATTEMPTS_DEFAULT,
        LOCK_ACQUIRE_TIMEOUT_DEFAULT, LOCK_LEASE_DEFAULT, RESERVATION_SWEEP_INTERVAL_DEFAULT,
        RESERVATION_TTL_DEFAULT, RETRY_BACKOFF_BASE_DEFAULT, SNAPSHOT_TTL_DEFAULT,
        SUMMARY_TTL_DEFAULT,
    },
    error::{EngineError, EngineResult, PoolAlternative},
    events::{BalanceChangeKind, BalanceEvent, BalanceFigures, RelatedEntityType},
    listener::BalanceEvents,
    traits::{
        AllocationRequest, AllocationResult, CapitalEngine, CreatePoolRequest, DefaultOutcome,
        FarmerExposure, FeeBreakdown, HealthReport, HealthStatus, LedgerReceipt,
        PerformanceReport, PoolBalanceUpdate, PoolsSummary, ReleaseRequest, ReleaseSource,
        ReleaseType, ReservationRequest,
    },
    validate::{ConstraintKind, EligibilityReport},
};

pub mod accel;
pub mod error;
pub mod maintain;
pub mod noop;

mod config;
mod engine;
mod events;
mod listener;
mod metrics;
mod selection;
mod traits;
mod validate;

#[cfg(any(test, feature = "test-utils"))]
/// Common builders for exercising the engine in tests.
pub mod test_utils;

/// A shareable handle to the capital engine.
///
/// Cheap to clone; every clone talks to the same ledger, accelerator and
/// subscriber registry.
pub struct PoolEngine<L, A> {
    inner: Arc<EngineInner<L, A>>,
}

// === impl PoolEngine ===

impl<L, A> PoolEngine<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Creates an engine over the given stores with the given
    /// configuration.
    pub fn new(ledger: L, accel: A, config: EngineConfig) -> Self {
        Self { inner: Arc::new(EngineInner::new(ledger, accel, config)) }
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        self.inner.config()
    }

    /// Expires every overdue reservation now. Normally driven by
    /// [`maintain::spawn_reservation_sweeper`]; exposed for tests and
    /// manual operation.
    pub async fn sweep_expired_reservations(&self) -> EngineResult<usize> {
        self.inner.sweep_expired_reservations().await
    }
}

impl PoolEngine<MemoryLedger, accel::InProcessAccelerator> {
    /// A fully in-process engine: in-memory ledger, in-process
    /// accelerator, default configuration. The default for tests and
    /// single-process embeddings.
    pub fn in_memory() -> Self {
        Self::new(
            MemoryLedger::new(),
            accel::InProcessAccelerator::new(),
            EngineConfig::default(),
        )
    }
}

impl<L, A> Clone for PoolEngine<L, A> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L, A> fmt::Debug for PoolEngine<L, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEngine").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<L, A> CapitalEngine for PoolEngine<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    async fn allocate_capital(&self, req: AllocationRequest) -> EngineResult<AllocationResult> {
        self.inner.allocate(req).await
    }

    async fn release_capital(&self, req: ReleaseRequest) -> EngineResult<LedgerReceipt> {
        self.inner.release(req).await
    }

    async fn handle_default(
        &self,
        advance_id: &str,
        pool_id: PoolId,
        defaulted_amount: Decimal,
        recovered_amount: Decimal,
    ) -> EngineResult<DefaultOutcome> {
        self.inner
            .recognize_default(advance_id, pool_id, defaulted_amount, recovered_amount)
            .await
    }

    async fn create_reservation(&self, req: ReservationRequest) -> EngineResult<Reservation> {
        self.inner.create_reservation(req).await
    }

    async fn commit_reservation(&self, id: ReservationId) -> EngineResult<Decimal> {
        self.inner.commit_reservation(id).await
    }

    async fn release_reservation(&self, id: ReservationId) -> EngineResult<Decimal> {
        self.inner.release_reservation(id).await
    }

    async fn get_balance(&self, pool_id: PoolId) -> EngineResult<BalanceSnapshot> {
        self.inner.balance(pool_id).await
    }

    async fn get_balances(&self, pool_ids: &[PoolId]) -> EngineResult<Vec<BalanceSnapshot>> {
        self.inner.balances(pool_ids).await
    }

    async fn get_summary(&self) -> EngineResult<PoolsSummary> {
        self.inner.summary().await
    }

    async fn get_performance(
        &self,
        pool_id: PoolId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<PerformanceReport> {
        self.inner.performance(pool_id, start, end).await
    }

    async fn assess_health(&self, pool_id: PoolId) -> EngineResult<HealthReport> {
        self.inner.assess_health(pool_id).await
    }

    async fn create_pool(&self, req: CreatePoolRequest) -> EngineResult<Pool> {
        self.inner.create_pool(req).await
    }

    async fn update_pool(&self, pool_id: PoolId, update: PoolConfigUpdate) -> EngineResult<Pool> {
        self.inner.update_pool(pool_id, update).await
    }

    async fn list_pools(&self, filter: PoolFilter) -> EngineResult<Vec<Pool>> {
        Ok(self.inner.ledger().pools(&filter).await?)
    }

    async fn get_pool_details(&self, pool_id: PoolId) -> EngineResult<Pool> {
        Ok(self.inner.ledger().pool(pool_id).await?)
    }

    async fn check_advance_eligibility(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        tier: RiskTier,
    ) -> EngineResult<EligibilityReport> {
        self.inner.check_advance_eligibility(pool_id, amount, tier).await
    }

    async fn get_transactions(
        &self,
        filter: TransactionFilter,
    ) -> EngineResult<Vec<PoolTransaction>> {
        Ok(self.inner.ledger().transactions(&filter).await?)
    }

    async fn get_transaction_summary(
        &self,
        filter: TransactionFilter,
    ) -> EngineResult<TransactionSummary> {
        Ok(self.inner.ledger().transaction_summary(&filter).await?)
    }

    async fn deposit_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        self.inner.deposit_capital(pool_id, amount, investor_id).await
    }

    async fn withdraw_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        self.inner.withdraw_capital(pool_id, amount, investor_id).await
    }

    async fn distribute_interest(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt> {
        self.inner.distribute_interest(pool_id, amount, investor_id).await
    }

    async fn batch_update_balances(
        &self,
        updates: Vec<PoolBalanceUpdate>,
        atomic: bool,
    ) -> EngineResult<Vec<EngineResult<LedgerReceipt>>> {
        self.inner.batch_update_balances(updates, atomic).await
    }

    fn subscribe(&self, pool_id: PoolId) -> BalanceEvents {
        self.inner.subscribe(pool_id)
    }

    fn subscribe_all(&self) -> BalanceEvents {
        self.inner.subscribe_all()
    }
}
