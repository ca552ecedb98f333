//! Token-checked per-pool lease locks.

use super::LeaseToken;
use agrocap_primitives::PoolId;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::warn;

/// How long to sleep between acquisition attempts on a contended lock.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

/// In-process lease locks with the same semantics as the distributed ones:
/// a bounded lease that auto-expires, and a release that only succeeds for
/// the token that acquired the lock.
#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    leases: parking_lot::Mutex<HashMap<PoolId, Lease>>,
}

impl LeaseTable {
    /// Tries to take the lock until `timeout` elapses.
    pub(crate) async fn acquire(
        &self,
        pool_id: PoolId,
        lease: Duration,
        timeout: Duration,
    ) -> Option<LeaseToken> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut leases = self.leases.lock();
                let now = Instant::now();
                let current = leases.get(&pool_id);
                if current.map_or(true, |l| l.expires_at <= now) {
                    let token = LeaseToken::fresh();
                    leases.insert(pool_id, Lease { token, expires_at: now + lease });
                    return Some(token);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Releases the lock iff `token` still owns it.
    pub(crate) fn release(&self, pool_id: PoolId, token: LeaseToken) -> bool {
        let mut leases = self.leases.lock();
        match leases.get(&pool_id) {
            Some(lease) if lease.token == token => {
                leases.remove(&pool_id);
                true
            }
            Some(_) => {
                // Lease expired and somebody else re-acquired; releasing
                // here would hand their critical section to a third party.
                warn!(target: "engine::lock", pool = %pool_id, "stale lease token on release");
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_exclusive_until_released() {
        let table = LeaseTable::default();
        let pool = PoolId::random();
        let lease = Duration::from_secs(10);

        let token = table.acquire(pool, lease, Duration::from_millis(50)).await.unwrap();
        assert!(table.acquire(pool, lease, Duration::from_millis(20)).await.is_none());

        assert!(table.release(pool, token));
        assert!(table.acquire(pool, lease, Duration::from_millis(50)).await.is_some());
    }

    #[tokio::test]
    async fn expired_lease_is_reacquirable_but_not_releasable() {
        let table = LeaseTable::default();
        let pool = PoolId::random();

        let stale = table
            .acquire(pool, Duration::from_millis(5), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        // the lease lapsed, so the next caller gets in
        let fresh = table
            .acquire(pool, Duration::from_secs(10), Duration::from_millis(50))
            .await
            .unwrap();

        // the stale token must not release the new holder's lock
        assert!(!table.release(pool, stale));
        assert!(table.release(pool, fresh));
    }
}
