//! Short-lived capital holds used during underwriting.

use crate::{PoolId, ReservationId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a reservation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Hold is in force and counted against effective available capital.
    Active,
    /// Converted into a deployment; kept briefly for idempotent commits.
    Committed,
    /// Cancelled by the caller.
    Released,
    /// TTL lapsed; treated as released.
    Expired,
}

/// A TTL-bound hold on pool capital.
///
/// Owned by the cache accelerator; never persisted in the primary store.
/// Losing a reservation on cache failure is acceptable, losing capital is
/// not — holds only gate *new* allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Reservation identifier.
    pub id: ReservationId,
    /// Pool the capital is held in.
    pub pool_id: PoolId,
    /// Advance being underwritten.
    pub advance_id: String,
    /// Farmer the advance is for.
    pub farmer_id: String,
    /// Held amount.
    pub amount: Decimal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Hard expiry; past this instant the hold no longer gates anything.
    pub expires_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: ReservationStatus,
}

impl Reservation {
    /// Whether the TTL has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this hold currently counts against effective available.
    pub fn holds_capital(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && !self.is_expired(now)
    }
}
