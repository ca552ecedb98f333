//! Two-phase capital reservations.
//!
//! A hold is created against the effective availability, then either
//! committed (the capital is deployed), released, or expired by the sweep.
//! With a registry-capable accelerator the hold lives only in the cache;
//! without one it is materialized as ledger-side reserved capital and
//! `RESERVE_ALLOCATION` entries (no TTL applies there — callers must
//! release explicitly).

use crate::{
    accel::Accelerator,
    engine::{figures_with_hold, EngineInner},
    error::{EngineError, EngineResult},
    events::{BalanceChangeKind, BalanceEvent, RelatedEntityType},
    traits::ReservationRequest,
};
use agrocap_primitives::{
    BalanceSnapshot, PoolStatus, Reservation, ReservationId, ReservationStatus, TransactionType,
};
use agrocap_storage::{
    BalanceChange, CapitalDelta, CounterDelta, LedgerStore, NewTransaction,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, instrument};

impl<L, A> EngineInner<L, A>
where
    L: LedgerStore,
    A: Accelerator,
{
    /// Places a hold on pool capital.
    #[instrument(skip(self, req), fields(pool = %req.pool_id), target = "engine::reserve")]
    pub(crate) async fn create_reservation(
        &self,
        req: ReservationRequest,
    ) -> EngineResult<Reservation> {
        if req.amount <= Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "reservation amount must be positive".to_owned(),
            ));
        }
        if req.advance_id.trim().is_empty() || req.farmer_id.trim().is_empty() {
            return Err(EngineError::ValidationError(
                "advance and farmer identifiers are required".to_owned(),
            ));
        }
        let reservation = if self.accel().reservations_supported() {
            self.with_retries("create_reservation", || self.try_create_hold(req.clone()))
                .await?
        } else {
            self.with_retries("create_reservation_fallback", || {
                self.try_create_fallback_hold(req.clone())
            })
            .await?
        };
        self.metrics().reservation_created();
        Ok(reservation)
    }

    /// Converts a hold into a deployment. Idempotent: committing a
    /// committed reservation returns its amount again.
    #[instrument(skip(self), fields(reservation = %id), target = "engine::reserve")]
    pub(crate) async fn commit_reservation(&self, id: ReservationId) -> EngineResult<Decimal> {
        if self.accel().reservations_supported() {
            self.commit_registry_hold(id).await
        } else {
            self.with_retries("commit_reservation_fallback", || {
                self.commit_fallback_hold(id)
            })
            .await
        }
    }

    /// Cancels a hold and returns the released amount.
    #[instrument(skip(self), fields(reservation = %id), target = "engine::reserve")]
    pub(crate) async fn release_reservation(&self, id: ReservationId) -> EngineResult<Decimal> {
        if self.accel().reservations_supported() {
            self.release_registry_hold(id).await
        } else {
            self.with_retries("release_reservation_fallback", || {
                self.release_fallback_hold(id)
            })
            .await
        }
    }

    /// Expires every overdue reservation. Called by the maintenance task
    /// at a cadence no longer than the TTL; also callable directly.
    pub(crate) async fn sweep_expired_reservations(&self) -> EngineResult<usize> {
        let expired = self
            .accel()
            .sweep_expired(Utc::now())
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()))?;
        for reservation in &expired {
            if let Err(err) = self.accel().invalidate(reservation.pool_id).await {
                debug!(
                    target: "engine::reserve",
                    pool = %reservation.pool_id,
                    %err,
                    "snapshot invalidation after expiry failed"
                );
            }
            self.metrics().reservation_settled("expired");
            self.publish_hold_event(BalanceChangeKind::ReservationReleased, reservation)
                .await;
        }
        if !expired.is_empty() {
            debug!(target: "engine::reserve", count = expired.len(), "expired reservations swept");
        }
        Ok(expired.len())
    }

    async fn try_create_hold(&self, req: ReservationRequest) -> EngineResult<Reservation> {
        let pool_id = req.pool_id;
        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.create_hold_locked(&req).await;
        self.release_pool_lock(pool_id, token).await;
        let (reservation, snapshot) = outcome?;

        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::ReservationCreated,
            amount: reservation.amount,
            balance_before: (&snapshot).into(),
            balance_after: figures_with_hold(&snapshot, reservation.amount),
            related_entity_id: Some(reservation.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: reservation.created_at,
        })
        .await;
        Ok(reservation)
    }

    async fn create_hold_locked(
        &self,
        req: &ReservationRequest,
    ) -> EngineResult<(Reservation, BalanceSnapshot)> {
        let pool = self.ledger().pool(req.pool_id).await?;
        if !pool.accepts_allocations() {
            return Err(EngineError::PoolPaused(pool.id));
        }
        let snapshot = self.fresh_balance(req.pool_id).await?;
        if req.amount > snapshot.effective_available {
            return Err(EngineError::InsufficientEffectiveAvailable {
                requested: req.amount,
                effective_available: snapshot.effective_available,
            });
        }

        let now = Utc::now();
        let ttl = req
            .ttl_seconds
            .map(|secs| ChronoDuration::seconds(secs as i64))
            .unwrap_or_else(|| {
                ChronoDuration::from_std(self.config().reservation_ttl)
                    .unwrap_or_else(|_| ChronoDuration::seconds(300))
            });
        let reservation = Reservation {
            id: ReservationId::random(),
            pool_id: req.pool_id,
            advance_id: req.advance_id.clone(),
            farmer_id: req.farmer_id.clone(),
            amount: req.amount,
            created_at: now,
            expires_at: now + ttl,
            status: ReservationStatus::Active,
        };
        self.accel()
            .store_reservation(&reservation)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()))?;
        if let Err(err) = self.accel().invalidate(req.pool_id).await {
            debug!(target: "engine::reserve", pool = %req.pool_id, %err, "invalidate failed");
        }
        Ok((reservation, snapshot))
    }

    async fn commit_registry_hold(&self, id: ReservationId) -> EngineResult<Decimal> {
        let reservation = self
            .accel()
            .reservation(id)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()))?
            .ok_or(EngineError::ReservationNotFound(id))?;

        match reservation.status {
            // already converted; repeating the commit is a no-op
            ReservationStatus::Committed => return Ok(reservation.amount),
            ReservationStatus::Released | ReservationStatus::Expired => {
                return Err(EngineError::ReservationNotFound(id))
            }
            ReservationStatus::Active => {}
        }
        if reservation.is_expired(Utc::now()) {
            // the TTL lapsed while the commit was in flight
            let _ = self
                .accel()
                .settle_reservation(id, ReservationStatus::Expired)
                .await;
            return Err(EngineError::ReservationNotFound(id));
        }

        let pool_id = reservation.pool_id;
        let token = self.acquire_pool_lock(pool_id).await?;
        let settled = self
            .accel()
            .settle_reservation(id, ReservationStatus::Committed)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()));
        if let Err(err) = self.accel().invalidate(pool_id).await {
            debug!(target: "engine::reserve", pool = %pool_id, %err, "invalidate failed");
        }
        self.release_pool_lock(pool_id, token).await;
        let settled = settled?.ok_or(EngineError::ReservationNotFound(id))?;

        self.metrics().reservation_settled("committed");
        Ok(settled.amount)
    }

    async fn release_registry_hold(&self, id: ReservationId) -> EngineResult<Decimal> {
        let reservation = self
            .accel()
            .reservation(id)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()))?
            .ok_or(EngineError::ReservationNotFound(id))?;

        if reservation.status != ReservationStatus::Active
            || reservation.is_expired(Utc::now())
        {
            // committed holds are deployments now; settled holds are gone
            return Err(EngineError::ReservationNotFound(id));
        }

        let pool_id = reservation.pool_id;
        let token = self.acquire_pool_lock(pool_id).await?;
        let settled = self
            .accel()
            .settle_reservation(id, ReservationStatus::Released)
            .await
            .map_err(|err| EngineError::CacheUnavailable(err.to_string()));
        if let Err(err) = self.accel().invalidate(pool_id).await {
            debug!(target: "engine::reserve", pool = %pool_id, %err, "invalidate failed");
        }
        self.release_pool_lock(pool_id, token).await;
        let settled = settled?.ok_or(EngineError::ReservationNotFound(id))?;
        if settled.status != ReservationStatus::Active {
            return Err(EngineError::ReservationNotFound(id));
        }

        self.metrics().reservation_settled("released");
        self.publish_hold_event(BalanceChangeKind::ReservationReleased, &settled)
            .await;
        Ok(settled.amount)
    }

    /// Event for a hold going away; durable balances are unchanged, only
    /// the effective availability moves back up.
    async fn publish_hold_event(
        &self,
        change_type: BalanceChangeKind,
        reservation: &Reservation,
    ) {
        let snapshot = match self.fresh_balance(reservation.pool_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(
                    target: "engine::reserve",
                    pool = %reservation.pool_id,
                    %err,
                    "skipping hold event, no balance view"
                );
                return;
            }
        };
        self.publish_event(BalanceEvent {
            pool_id: reservation.pool_id,
            change_type,
            amount: reservation.amount,
            balance_before: figures_with_hold(&snapshot, reservation.amount),
            balance_after: (&snapshot).into(),
            related_entity_id: Some(reservation.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: Utc::now(),
        })
        .await;
    }

    // --- fallback mode: holds live in the ledger's reserved bucket ---

    async fn try_create_fallback_hold(
        &self,
        req: ReservationRequest,
    ) -> EngineResult<Reservation> {
        let pool_id = req.pool_id;
        let now = Utc::now();
        let ttl = req
            .ttl_seconds
            .map(|secs| ChronoDuration::seconds(secs as i64))
            .unwrap_or_else(|| {
                ChronoDuration::from_std(self.config().reservation_ttl)
                    .unwrap_or_else(|_| ChronoDuration::seconds(300))
            });
        let reservation = Reservation {
            id: ReservationId::random(),
            pool_id,
            advance_id: req.advance_id.clone(),
            farmer_id: req.farmer_id.clone(),
            amount: req.amount,
            created_at: now,
            expires_at: now + ttl,
            status: ReservationStatus::Active,
        };

        let change = BalanceChange {
            pool_id,
            capital: CapitalDelta {
                available: -req.amount,
                reserved: req.amount,
                ..Default::default()
            },
            counters: CounterDelta::default(),
            require_status: Some(PoolStatus::Active),
            enforce_reserve_floor: true,
            mark_allocation: false,
            farmer_exposure: None,
            records: vec![NewTransaction::debiting(
                TransactionType::ReserveAllocation,
                req.amount,
                format!("capital hold for advance {}", req.advance_id),
            )
            .with_metadata(json!({
                "reservationId": reservation.id,
                "phase": "HOLD",
            }))
            .for_advance(req.advance_id.clone())],
        };

        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(change).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;

        self.fallback_reservations()
            .lock()
            .insert(reservation.id, reservation.clone());

        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::ReservationCreated,
            amount: req.amount,
            balance_before: (&BalanceSnapshot::compute(&committed.before, Decimal::ZERO)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, Decimal::ZERO)).into(),
            related_entity_id: Some(req.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: reservation.created_at,
        })
        .await;
        Ok(reservation)
    }

    async fn commit_fallback_hold(&self, id: ReservationId) -> EngineResult<Decimal> {
        let reservation = self
            .fallback_reservations()
            .lock()
            .get(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        let pool_id = reservation.pool_id;
        let amount = reservation.amount;

        let change = BalanceChange {
            pool_id,
            capital: CapitalDelta {
                reserved: -amount,
                deployed: amount,
                ..Default::default()
            },
            counters: CounterDelta {
                issued: 1,
                active: 1,
                disbursed: amount,
                ..Default::default()
            },
            require_status: None,
            enforce_reserve_floor: true,
            mark_allocation: true,
            farmer_exposure: Some((reservation.farmer_id.clone(), amount)),
            records: vec![NewTransaction {
                txn_type: TransactionType::ReserveAllocation,
                amount,
                available_effect: Decimal::ZERO,
                description: format!("hold converted for advance {}", reservation.advance_id),
                metadata: json!({ "reservationId": id, "phase": "COMMIT" }),
                related_advance_id: Some(reservation.advance_id.clone()),
                related_investor_id: None,
            }],
        };

        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(change).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;
        self.fallback_reservations().lock().remove(&id);
        self.metrics().reservation_settled("committed");

        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount,
            balance_before: (&BalanceSnapshot::compute(&committed.before, Decimal::ZERO)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, Decimal::ZERO)).into(),
            related_entity_id: Some(reservation.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: Utc::now(),
        })
        .await;
        Ok(amount)
    }

    async fn release_fallback_hold(&self, id: ReservationId) -> EngineResult<Decimal> {
        let reservation = self
            .fallback_reservations()
            .lock()
            .get(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        let pool_id = reservation.pool_id;
        let amount = reservation.amount;

        let change = BalanceChange {
            pool_id,
            capital: CapitalDelta {
                reserved: -amount,
                available: amount,
                ..Default::default()
            },
            counters: CounterDelta::default(),
            require_status: None,
            enforce_reserve_floor: true,
            mark_allocation: false,
            farmer_exposure: None,
            records: vec![NewTransaction::crediting(
                TransactionType::ReserveAllocation,
                amount,
                format!("hold released for advance {}", reservation.advance_id),
            )
            .with_metadata(json!({ "reservationId": id, "phase": "RELEASE" }))
            .for_advance(reservation.advance_id.clone())],
        };

        let token = self.acquire_pool_lock(pool_id).await?;
        let outcome = self.commit_and_refresh(change).await;
        self.release_pool_lock(pool_id, token).await;
        let committed = outcome?;
        self.fallback_reservations().lock().remove(&id);
        self.metrics().reservation_settled("released");

        self.publish_event(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::ReservationReleased,
            amount,
            balance_before: (&BalanceSnapshot::compute(&committed.before, Decimal::ZERO)).into(),
            balance_after: (&BalanceSnapshot::compute(&committed.after, Decimal::ZERO)).into(),
            related_entity_id: Some(reservation.advance_id.clone()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: Utc::now(),
        })
        .await;
        Ok(amount)
    }
}
