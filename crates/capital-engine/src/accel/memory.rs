//! In-process accelerator.
//!
//! The full capability set without an external cache: an LRU of TTL'd
//! balance snapshots, the reservation registry, lease locks and a broadcast
//! channel standing in for cross-process pub/sub. Suitable for
//! single-process deployments and as the reference for distributed
//! implementations.

use super::{AccelResult, Accelerator, LeaseTable, LeaseToken};
use crate::events::BalanceEvent;
use agrocap_primitives::{
    BalanceSnapshot, PoolId, Reservation, ReservationId, ReservationStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schnellru::{ByLength, LruMap};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;

/// Snapshot cache capacity. Pools are few; this is a generous bound.
const SNAPSHOT_CACHE_CAPACITY: u32 = 4096;

/// Buffered events on the broadcast channel.
const PUBLISH_BUFFER_SIZE: usize = 1024;

#[derive(Debug)]
struct CachedSnapshot {
    snapshot: BalanceSnapshot,
    expires_at: Instant,
}

/// Reservation registry: every record by id, plus the per-pool index of
/// active hold amounts.
#[derive(Debug, Default)]
struct ReservationBook {
    all: HashMap<ReservationId, Reservation>,
    active_by_pool: HashMap<PoolId, HashMap<ReservationId, Decimal>>,
}

impl ReservationBook {
    fn retire_from_index(&mut self, pool_id: PoolId, id: ReservationId) {
        if let Some(holds) = self.active_by_pool.get_mut(&pool_id) {
            holds.remove(&id);
            if holds.is_empty() {
                self.active_by_pool.remove(&pool_id);
            }
        }
    }
}

/// In-process [`Accelerator`] implementation.
pub struct InProcessAccelerator {
    snapshots: parking_lot::Mutex<LruMap<PoolId, CachedSnapshot>>,
    reservations: parking_lot::Mutex<ReservationBook>,
    locks: LeaseTable,
    publisher: broadcast::Sender<Arc<BalanceEvent>>,
}

impl std::fmt::Debug for InProcessAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessAccelerator").finish_non_exhaustive()
    }
}

impl Default for InProcessAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessAccelerator {
    /// Creates an empty accelerator.
    pub fn new() -> Self {
        let (publisher, _) = broadcast::channel(PUBLISH_BUFFER_SIZE);
        Self {
            snapshots: parking_lot::Mutex::new(LruMap::new(ByLength::new(
                SNAPSHOT_CACHE_CAPACITY,
            ))),
            reservations: parking_lot::Mutex::new(ReservationBook::default()),
            locks: LeaseTable::default(),
            publisher,
        }
    }

    /// Subscribes to the cross-process publication channel.
    ///
    /// In a distributed deployment this is the feed a relay would forward
    /// to other processes.
    pub fn published_events(&self) -> broadcast::Receiver<Arc<BalanceEvent>> {
        self.publisher.subscribe()
    }

    fn fresh_snapshot(&self, pool_id: PoolId) -> Option<BalanceSnapshot> {
        let mut snapshots = self.snapshots.lock();
        match snapshots.get(&pool_id) {
            Some(cached) if cached.expires_at > Instant::now() => {
                Some(cached.snapshot.clone().cached())
            }
            Some(_) => {
                snapshots.remove(&pool_id);
                None
            }
            None => None,
        }
    }
}

#[async_trait::async_trait]
impl Accelerator for InProcessAccelerator {
    async fn snapshot(&self, pool_id: PoolId) -> AccelResult<Option<BalanceSnapshot>> {
        Ok(self.fresh_snapshot(pool_id))
    }

    async fn snapshots(&self, pool_ids: &[PoolId]) -> AccelResult<Vec<Option<BalanceSnapshot>>> {
        Ok(pool_ids.iter().map(|id| self.fresh_snapshot(*id)).collect())
    }

    async fn store_snapshot(&self, snapshot: &BalanceSnapshot, ttl: Duration) -> AccelResult<()> {
        self.snapshots.lock().insert(
            snapshot.pool_id,
            CachedSnapshot { snapshot: snapshot.clone(), expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn invalidate(&self, pool_id: PoolId) -> AccelResult<()> {
        self.snapshots.lock().remove(&pool_id);
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
        true
    }

    async fn store_reservation(&self, reservation: &Reservation) -> AccelResult<()> {
        let mut book = self.reservations.lock();
        book.all.insert(reservation.id, reservation.clone());
        if reservation.status == ReservationStatus::Active {
            book.active_by_pool
                .entry(reservation.pool_id)
                .or_default()
                .insert(reservation.id, reservation.amount);
        }
        Ok(())
    }

    async fn reservation(&self, id: ReservationId) -> AccelResult<Option<Reservation>> {
        Ok(self.reservations.lock().all.get(&id).cloned())
    }

    async fn settle_reservation(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> AccelResult<Option<Reservation>> {
        let mut book = self.reservations.lock();
        let Some(reservation) = book.all.get(&id).cloned() else {
            return Ok(None);
        };
        if reservation.status == ReservationStatus::Active {
            let mut settled = reservation.clone();
            settled.status = status;
            book.all.insert(id, settled);
            book.retire_from_index(reservation.pool_id, id);
        }
        Ok(Some(reservation))
    }

    async fn active_reservation_total(&self, pool_id: PoolId) -> AccelResult<Decimal> {
        let now = Utc::now();
        let book = self.reservations.lock();
        let Some(holds) = book.active_by_pool.get(&pool_id) else {
            return Ok(Decimal::ZERO);
        };
        Ok(holds
            .iter()
            .filter(|(id, _)| {
                book.all.get(id).is_some_and(|r| r.holds_capital(now))
            })
            .map(|(_, amount)| *amount)
            .sum())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> AccelResult<Vec<Reservation>> {
        let mut book = self.reservations.lock();
        let mut expired = Vec::new();
        let mut purge = Vec::new();
        for (id, reservation) in &book.all {
            if !reservation.is_expired(now) {
                continue;
            }
            match reservation.status {
                ReservationStatus::Active => {
                    let mut lapsed = reservation.clone();
                    lapsed.status = ReservationStatus::Expired;
                    expired.push(lapsed);
                }
                // settled records have served their idempotence window
                _ => purge.push(*id),
            }
        }
        for reservation in &expired {
            book.all.insert(
                reservation.id,
                reservation.clone(),
            );
            book.retire_from_index(reservation.pool_id, reservation.id);
        }
        for id in purge {
            book.all.remove(&id);
        }
        Ok(expired)
    }

    async fn publish(&self, event: &BalanceEvent) -> AccelResult<()> {
        // no receivers is fine; cross-process delivery is best effort
        let _ = self.publisher.send(Arc::new(event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrocap_primitives::{AdvanceCounters, Pool, PoolStatus, RiskTier};

    fn snapshot(pool_id: PoolId) -> BalanceSnapshot {
        let now = Utc::now();
        let pool = Pool {
            id: pool_id,
            name: "accel".to_owned(),
            description: None,
            status: PoolStatus::Active,
            risk_tier: RiskTier::A,
            currency: "MXN".to_owned(),
            total_capital: Decimal::from(100_000),
            available_capital: Decimal::from(100_000),
            deployed_capital: Decimal::ZERO,
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
        };
        BalanceSnapshot::compute(&pool, Decimal::ZERO)
    }

    fn reservation(pool_id: PoolId, amount: i64, ttl: chrono::Duration) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: ReservationId::random(),
            pool_id,
            advance_id: "adv-1".to_owned(),
            farmer_id: "farmer-1".to_owned(),
            amount: Decimal::from(amount),
            created_at: now,
            expires_at: now + ttl,
            status: ReservationStatus::Active,
        }
    }

    #[tokio::test]
    async fn snapshots_expire_by_ttl() {
        let accel = InProcessAccelerator::new();
        let snap = snapshot(PoolId::random());
        let id = snap.pool_id;

        accel.store_snapshot(&snap, Duration::from_millis(10)).await.unwrap();
        let hit = accel.snapshot(id).await.unwrap().unwrap();
        assert!(hit.from_cache);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(accel.snapshot(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_totals_ignore_expired_holds() {
        let accel = InProcessAccelerator::new();
        let pool = PoolId::random();
        accel
            .store_reservation(&reservation(pool, 10_000, chrono::Duration::seconds(60)))
            .await
            .unwrap();
        accel
            .store_reservation(&reservation(pool, 5_000, chrono::Duration::milliseconds(-1)))
            .await
            .unwrap();

        assert_eq!(
            accel.active_reservation_total(pool).await.unwrap(),
            Decimal::from(10_000)
        );
    }

    #[tokio::test]
    async fn settle_is_idempotent_and_retires_the_hold() {
        let accel = InProcessAccelerator::new();
        let pool = PoolId::random();
        let held = reservation(pool, 10_000, chrono::Duration::seconds(60));
        accel.store_reservation(&held).await.unwrap();

        let first = accel
            .settle_reservation(held.id, ReservationStatus::Committed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, ReservationStatus::Active);
        assert_eq!(accel.active_reservation_total(pool).await.unwrap(), Decimal::ZERO);

        // settled records report their settled state on re-read
        let second = accel
            .settle_reservation(held.id, ReservationStatus::Committed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, ReservationStatus::Committed);
    }

    #[tokio::test]
    async fn sweep_expires_active_and_purges_settled() {
        let accel = InProcessAccelerator::new();
        let pool = PoolId::random();
        let lapsing = reservation(pool, 10_000, chrono::Duration::milliseconds(-1));
        accel.store_reservation(&lapsing).await.unwrap();

        let expired = accel.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ReservationStatus::Expired);

        // second sweep purges the tombstone
        assert!(accel.sweep_expired(Utc::now()).await.unwrap().is_empty());
        assert!(accel.reservation(lapsing.id).await.unwrap().is_none());
    }
}
