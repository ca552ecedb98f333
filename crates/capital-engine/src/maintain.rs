//! Background maintenance.
//!
//! One task keeps the reservation registry honest: every tick it expires
//! overdue holds so their capital flows back into effective availability.
//! The cadence must not exceed the reservation TTL, which the default
//! configuration guarantees.

use crate::{accel::Accelerator, PoolEngine};
use agrocap_storage::LedgerStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawns the reservation sweeper at the engine's configured cadence.
pub fn spawn_reservation_sweeper<L, A>(engine: PoolEngine<L, A>) -> JoinHandle<()>
where
    L: LedgerStore,
    A: Accelerator,
{
    let every = engine.config().reservation_sweep_interval;
    tokio::spawn(maintain_reservations(engine, every))
}

/// Runs the expiry sweep forever at the given cadence.
///
/// Prefer [`spawn_reservation_sweeper`]; this exists for callers that
/// manage their own task set.
pub async fn maintain_reservations<L, A>(engine: PoolEngine<L, A>, every: Duration)
where
    L: LedgerStore,
    A: Accelerator,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = engine.sweep_expired_reservations().await {
            warn!(target: "engine::maintain", %err, "reservation sweep failed");
        }
    }
}
