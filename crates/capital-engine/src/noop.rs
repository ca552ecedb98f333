//! Degraded-mode accelerator.
//!
//! Used when no shared cache is reachable: snapshot reads always fall
//! through to the ledger, reservations are materialized as ledger-side
//! reserved capital by the engine, and cross-process publication is
//! dropped. Locking stays in force but is process-local, which weakens
//! multi-process safety; operators must run a single engine process in
//! this mode.

use crate::{
    accel::{AccelError, AccelResult, Accelerator, LeaseTable, LeaseToken},
    events::BalanceEvent,
};
use agrocap_primitives::{
    BalanceSnapshot, PoolId, Reservation, ReservationId, ReservationStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

/// An [`Accelerator`] with no cache, no registry and no fan-out.
#[derive(Debug, Default)]
pub struct NoopAccelerator {
    locks: LeaseTable,
}

impl NoopAccelerator {
    /// Creates the degraded-mode accelerator.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Accelerator for NoopAccelerator {
    async fn snapshot(&self, _pool_id: PoolId) -> AccelResult<Option<BalanceSnapshot>> {
        Ok(None)
    }

    async fn snapshots(&self, pool_ids: &[PoolId]) -> AccelResult<Vec<Option<BalanceSnapshot>>> {
        Ok(vec![None; pool_ids.len()])
    }

    async fn store_snapshot(
        &self,
        _snapshot: &BalanceSnapshot,
        _ttl: Duration,
    ) -> AccelResult<()> {
        Ok(())
    }

    async fn invalidate(&self, _pool_id: PoolId) -> AccelResult<()> {
        Ok(())
    }

    async fn lock(
        &self,
        pool_id: PoolId,
        lease: Duration,
        timeout: Duration,
    ) -> AccelResult<Option<LeaseToken>> {
        Ok(self.locks.acquire(pool_id, lease, timeout).await)
    }

    async fn unlock(&self, pool_id: PoolId, token: LeaseToken) -> AccelResult<bool> {
        Ok(self.locks.release(pool_id, token))
    }

    fn reservations_supported(&self) -> bool {
        false
    }

    async fn store_reservation(&self, _reservation: &Reservation) -> AccelResult<()> {
        Err(AccelError::Unavailable("no reservation registry in degraded mode".to_owned()))
    }

    async fn reservation(&self, _id: ReservationId) -> AccelResult<Option<Reservation>> {
        Ok(None)
    }

    async fn settle_reservation(
        &self,
        _id: ReservationId,
        _status: ReservationStatus,
    ) -> AccelResult<Option<Reservation>> {
        Ok(None)
    }

    async fn active_reservation_total(&self, _pool_id: PoolId) -> AccelResult<Decimal> {
        Ok(Decimal::ZERO)
    }

    async fn sweep_expired(&self, _now: DateTime<Utc>) -> AccelResult<Vec<Reservation>> {
        Ok(Vec::new())
    }

    async fn publish(&self, _event: &BalanceEvent) -> AccelResult<()> {
        Ok(())
    }
}
