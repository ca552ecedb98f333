//! Engine internals.
//!
//! [`EngineInner`] owns the ledger store, the accelerator and the listener
//! registries, and provides the building blocks every operation composes:
//!
//!  - the *composite critical section*: the per-pool lease lock is taken
//!    first, the store's row lock second (inside
//!    [`LedgerStore::commit`](agrocap_storage::LedgerStore::commit)); no
//!    other order exists anywhere in the engine,
//!  - cache-first balance reads with fall-through recompute,
//!  - the bounded, jittered retry loop for retryable commit failures,
//!  - post-commit event publication (in-process fan-out plus the
//!    accelerator's cross-process channel), which always happens after the
//!    locks are released.

use crate::{
    accel::{Accelerator, LeaseToken},
    config::EngineConfig,
    error::{EngineError, EngineResult},
    events::{BalanceEvent, BalanceFigures},
    listener::{BalanceEvents, EventListeners},
    metrics::EngineMetrics,
    traits::PoolsSummary,
};
use agrocap_primitives::{
    BalanceSnapshot, PoolId, Reservation, ReservationId,
};
use agrocap_storage::{BalanceChange, CommittedChange, LedgerStore};
use rand::Rng;
use rust_decimal::Decimal;
use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

mod allocate;
mod release;
mod reserve;
mod admin;
mod analytics;

/// Shared engine internals. The public [`PoolEngine`](crate::PoolEngine) is
/// an `Arc` around this.
#[derive(Debug)]
pub(crate) struct EngineInner<L, A> {
    ledger: L,
    accel: A,
    config: EngineConfig,
    listeners: EventListeners,
    /// Holds materialized in the ledger when the accelerator has no
    /// registry; keyed here so commit/release can find their amounts.
    fallback_reservations: parking_lot::Mutex<HashMap<ReservationId, Reservation>>,
    summary_cache: parking_lot::Mutex<Option<(Instant, PoolsSummary)>>,
    metrics: EngineMetrics,
}

// === impl EngineInner ===

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    pub(crate) fn new(ledger: L, accel: A, config: EngineConfig) -> Self {
        Self {
            ledger,
            accel,
            config,
            listeners: EventListeners::default(),
            fallback_reservations: parking_lot::Mutex::new(HashMap::new()),
            summary_cache: parking_lot::Mutex::new(None),
            metrics: EngineMetrics,
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn ledger(&self) -> &L {
        &self.ledger
    }

    pub(crate) fn accel(&self) -> &A {
        &self.accel
    }

    pub(crate) fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub(crate) fn fallback_reservations(
        &self,
    ) -> &parking_lot::Mutex<HashMap<ReservationId, Reservation>> {
        &self.fallback_reservations
    }

    /// Registers a per-pool subscriber.
    pub(crate) fn subscribe(&self, pool_id: PoolId) -> BalanceEvents {
        self.listeners.subscribe(pool_id)
    }

    /// Registers a wildcard subscriber.
    pub(crate) fn subscribe_all(&self) -> BalanceEvents {
        self.listeners.subscribe_all()
    }

    /// Acquires the per-pool lease lock: the first half of the composite
    /// critical section.
    pub(crate) async fn acquire_pool_lock(&self, pool_id: PoolId) -> EngineResult<LeaseToken> {
        let acquired = self
            .accel
            .lock(pool_id, self.config.lock_lease, self.config.lock_acquire_timeout)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()))?;
        match acquired {
            Some(token) => Ok(token),
            None => {
                self.metrics.lock_contended();
                Err(EngineError::LockUnavailable(pool_id))
            }
        }
    }

    /// Releases the lease lock; a stale token is logged, never escalated.
    pub(crate) async fn release_pool_lock(&self, pool_id: PoolId, token: LeaseToken) {
        match self.accel.unlock(pool_id, token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(target: "engine::lock", pool = %pool_id, "lease expired before release")
            }
            Err(err) => {
                warn!(target: "engine::lock", pool = %pool_id, %err, "failed to release lock")
            }
        }
    }

    /// Commits a balance change and refreshes the caches that now lie.
    ///
    /// Snapshot invalidation happens before the lock is released by the
    /// caller; event publication must happen after.
    pub(crate) async fn commit_and_refresh(
        &self,
        change: BalanceChange,
    ) -> EngineResult<CommittedChange> {
        let pool_id = change.pool_id;
        let committed = self.ledger.commit(change).await?;
        if let Err(err) = self.accel.invalidate(pool_id).await {
            warn!(target: "engine::cache", pool = %pool_id, %err, "snapshot invalidation failed");
        }
        *self.summary_cache.lock() = None;
        trace!(
            target: "engine::commit",
            pool = %pool_id,
            available = %committed.after.available_capital,
            deployed = %committed.after.deployed_capital,
            "balance change committed"
        );
        Ok(committed)
    }

    /// Recomputes a pool's balance view from the store and the active
    /// holds.
    pub(crate) async fn fresh_balance(&self, pool_id: PoolId) -> EngineResult<BalanceSnapshot> {
        let pool = self.ledger.pool(pool_id).await?;
        let holds = match self.accel.active_reservation_total(pool_id).await {
            Ok(holds) => holds,
            Err(err) => {
                // degraded: holds live in the ledger's reserved bucket
                debug!(target: "engine::cache", pool = %pool_id, %err, "no hold registry");
                Decimal::ZERO
            }
        };
        Ok(BalanceSnapshot::compute(&pool, holds))
    }

    /// Cache-first balance view.
    pub(crate) async fn balance(&self, pool_id: PoolId) -> EngineResult<BalanceSnapshot> {
        match self.accel.snapshot(pool_id).await {
            Ok(Some(snapshot)) => {
                self.metrics.snapshot_cache(true);
                return Ok(snapshot);
            }
            Ok(None) => {}
            Err(err) => {
                debug!(target: "engine::cache", pool = %pool_id, %err, "snapshot read failed");
            }
        }
        self.metrics.snapshot_cache(false);
        let snapshot = self.fresh_balance(pool_id).await?;
        if let Err(err) = self.accel.store_snapshot(&snapshot, self.config.snapshot_ttl).await {
            debug!(target: "engine::cache", pool = %pool_id, %err, "snapshot store failed");
        }
        Ok(snapshot)
    }

    /// Runs `op` with the engine's bounded, jittered retry policy for
    /// retryable failures (`ConcurrentMutation`, `LockUnavailable`,
    /// backend unavailability).
    pub(crate) async fn with_retries<T, F, Fut>(
        &self,
        op_name: &'static str,
        mut op: F,
    ) -> EngineResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = EngineResult<T>> + Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.config.commit_attempts => {
                    self.metrics.commit_retried();
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        target: "engine::retry",
                        op = op_name,
                        attempt,
                        code = err.code(),
                        ?delay,
                        "retrying after retryable failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_base;
        let exponential = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_cap = (base.as_millis() as u64 / 2).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap));
        exponential + jitter
    }

    /// Publishes an event in-process and cross-process. Must be called
    /// after every lock is released; delivery failures never propagate.
    pub(crate) async fn publish_event(&self, event: BalanceEvent) {
        let event = Arc::new(event);
        self.listeners.notify(&event);
        if let Err(err) = self.accel.publish(&event).await {
            warn!(
                target: "engine::events",
                pool = %event.pool_id,
                change = %event.change_type,
                %err,
                "cross-process publish failed"
            );
        }
    }

    /// Summary cache read; `None` when absent or stale.
    pub(crate) fn cached_summary(&self) -> Option<PoolsSummary> {
        let cache = self.summary_cache.lock();
        cache
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.config.summary_ttl)
            .map(|(_, summary)| summary.clone())
    }

    pub(crate) fn store_summary(&self, summary: &PoolsSummary) {
        *self.summary_cache.lock() = Some((Instant::now(), summary.clone()));
    }
}

/// Balance figures with `hold` subtracted from the effective availability,
/// used for the before/after pair of reservation events where the durable
/// position does not move.
pub(crate) fn figures_with_hold(snapshot: &BalanceSnapshot, hold: Decimal) -> BalanceFigures {
    let mut figures = BalanceFigures::from(snapshot);
    figures.effective_available = (figures.effective_available - hold).max(Decimal::ZERO);
    figures
}
