#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Commonly used types for the agrocap capital engine.
//!
//! This crate contains the shared vocabulary of the engine: pool and ledger
//! records, capital reservations, derived balance snapshots, and the
//! fixed-point money helpers every balance computation goes through.
//!
//! ## Money
//!
//! All balance arithmetic uses [`rust_decimal::Decimal`]. Amounts that land
//! in a ledger record or a pool row are rounded to [`money::MONEY_SCALE`]
//! with banker's rounding; rates and ratios keep [`money::RATE_SCALE`]
//! digits. Floating point never touches a balance.
//!
//! ## Wire compatibility
//!
//! The enums in this crate serialize to the exact string identifiers other
//! platform services expect (`ACTIVE`, `ADVANCE_DISBURSEMENT`, …), and the
//! JSON shapes are stable. Renaming a variant is a breaking protocol change.

pub mod money;

mod ids;
pub use ids::{PoolId, ReservationId, TransactionId};

mod pool;
pub use pool::{AdvanceCounters, Pool, PoolStatus, RiskTier};

mod transaction;
pub use transaction::{PoolTransaction, TransactionType};

mod reservation;
pub use reservation::{Reservation, ReservationStatus};

mod snapshot;
pub use snapshot::BalanceSnapshot;

/// Allocation pool-selection strategies.
///
/// Determines how [`Pool`] candidates are ranked when the caller does not
/// pin a preferred pool.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationPriority {
    /// Ascending default rate, ties broken by available capital then id.
    #[default]
    LowestRisk,
    /// Descending available capital.
    HighestAvailable,
    /// Descending actual return rate.
    BestReturn,
    /// Least recently allocated pool first.
    RoundRobin,
    /// Composite score over risk, availability and return.
    Weighted,
}
