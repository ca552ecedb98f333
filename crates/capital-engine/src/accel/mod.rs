//! The cache accelerator capability.
//!
//! Everything ephemeral lives behind one interface: balance snapshot
//! caching, the reservation registry, per-pool lease locks and cross-process
//! event publication. The allocation algorithm is identical whichever
//! implementation backs it; a deployment without a shared cache runs on
//! [`NoopAccelerator`](crate::noop::NoopAccelerator) and only loses the
//! acceleration, not correctness.

use agrocap_primitives::{BalanceSnapshot, PoolId, Reservation, ReservationId, ReservationStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use crate::events::BalanceEvent;

mod lease;
pub(crate) use lease::LeaseTable;

mod memory;
pub use memory::InProcessAccelerator;

/// Result alias for accelerator operations.
pub type AccelResult<T> = Result<T, AccelError>;

/// Accelerator failure. The engine degrades (falls through to the store)
/// on reads and surfaces `CacheUnavailable` where correctness needs the
/// capability.
#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    /// The accelerator backend failed or the capability is absent.
    #[error("accelerator unavailable: {0}")]
    Unavailable(String),
}

/// Proof of holding a pool's lease lock.
///
/// Release is token-checked: a caller whose lease expired cannot release
/// the lock out from under the next holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken(uuid::Uuid);

impl LeaseToken {
    pub(crate) fn fresh() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// Ephemeral state accelerator: snapshots, reservations, locks, pub/sub.
#[async_trait::async_trait]
pub trait Accelerator: Send + Sync + 'static {
    /// Cached snapshot for `pool_id`, if present and fresh.
    async fn snapshot(&self, pool_id: PoolId) -> AccelResult<Option<BalanceSnapshot>>;

    /// Multi-get; one entry per requested id, in order.
    async fn snapshots(&self, pool_ids: &[PoolId]) -> AccelResult<Vec<Option<BalanceSnapshot>>>;

    /// Caches a snapshot for `ttl`.
    async fn store_snapshot(&self, snapshot: &BalanceSnapshot, ttl: Duration) -> AccelResult<()>;

    /// Drops the cached snapshot for `pool_id`.
    async fn invalidate(&self, pool_id: PoolId) -> AccelResult<()>;

    /// Acquires the per-pool lease lock, waiting up to `timeout`. `None`
    /// means the lock stayed contended for the whole budget.
    async fn lock(
        &self,
        pool_id: PoolId,
        lease: Duration,
        timeout: Duration,
    ) -> AccelResult<Option<LeaseToken>>;

    /// Releases the lock if `token` still owns it. Returns whether the
    /// release actually happened.
    async fn unlock(&self, pool_id: PoolId, token: LeaseToken) -> AccelResult<bool>;

    /// Whether this accelerator keeps a reservation registry. When `false`
    /// the engine materializes holds as ledger-side reserved capital.
    fn reservations_supported(&self) -> bool;

    /// Stores an active reservation.
    async fn store_reservation(&self, reservation: &Reservation) -> AccelResult<()>;

    /// Looks a reservation up in any lifecycle state.
    async fn reservation(&self, id: ReservationId) -> AccelResult<Option<Reservation>>;

    /// Settles an active reservation into `status`, returning the record
    /// as it was. Already-settled reservations are returned unchanged so
    /// commits stay idempotent.
    async fn settle_reservation(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> AccelResult<Option<Reservation>>;

    /// Sum of the active, unexpired holds on a pool.
    async fn active_reservation_total(&self, pool_id: PoolId) -> AccelResult<Decimal>;

    /// Expires every active reservation past its deadline and purges
    /// settled records whose deadline passed. Returns the newly expired
    /// reservations.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> AccelResult<Vec<Reservation>>;

    /// Cross-process fan-out. Best effort; failures are logged by the
    /// caller, never propagated.
    async fn publish(&self, event: &BalanceEvent) -> AccelResult<()>;
}
