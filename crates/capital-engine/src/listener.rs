//! In-process event fan-out.
//!
//! Subscribers register per pool id or for everything (`*` semantics) and
//! receive events over a bounded channel. Delivery is best effort: a full
//! channel drops the event for that subscriber with a debug log, a closed
//! channel deregisters the subscriber. A slow or failed subscriber never
//! fails the operation that produced the event.

use crate::events::BalanceEvent;
use agrocap_primitives::PoolId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each subscriber channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// One registered subscriber.
#[derive(Debug)]
struct EventSubscriber {
    /// `None` subscribes to every pool.
    filter: Option<PoolId>,
    sender: mpsc::Sender<Arc<BalanceEvent>>,
}

/// Registry of in-process event subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventListeners {
    subscribers: parking_lot::Mutex<Vec<EventSubscriber>>,
}

impl EventListeners {
    /// Registers a subscriber for one pool.
    pub(crate) fn subscribe(&self, pool_id: PoolId) -> BalanceEvents {
        self.register(Some(pool_id))
    }

    /// Registers a wildcard subscriber.
    pub(crate) fn subscribe_all(&self) -> BalanceEvents {
        self.register(None)
    }

    fn register(&self, filter: Option<PoolId>) -> BalanceEvents {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER_SIZE);
        self.subscribers.lock().push(EventSubscriber { filter, sender });
        BalanceEvents { receiver }
    }

    /// Fans `event` out to every matching subscriber.
    pub(crate) fn notify(&self, event: &Arc<BalanceEvent>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|subscriber| {
            if subscriber.filter.is_some_and(|id| id != event.pool_id) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.try_send(Arc::clone(event)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(
                        target: "engine::events",
                        pool = %event.pool_id,
                        "subscriber channel full; dropping event"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A stream of balance events for one subscription.
///
/// Dropping the handle unsubscribes; the registry prunes the entry on the
/// next notification.
#[derive(Debug)]
pub struct BalanceEvents {
    receiver: mpsc::Receiver<Arc<BalanceEvent>>,
}

impl BalanceEvents {
    /// Waits for the next event; `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<Arc<BalanceEvent>> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Arc<BalanceEvent>> {
        self.receiver.try_recv().ok()
    }

    /// Unwraps the underlying channel.
    pub fn into_inner(self) -> mpsc::Receiver<Arc<BalanceEvent>> {
        self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BalanceChangeKind, BalanceFigures};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn event(pool_id: PoolId) -> Arc<BalanceEvent> {
        let figures = BalanceFigures {
            total_capital: Decimal::from(100),
            available_capital: Decimal::from(100),
            deployed_capital: Decimal::ZERO,
            reserved_capital: Decimal::ZERO,
            effective_available: Decimal::from(85),
            utilization_rate: Decimal::ZERO,
            reserve_ratio: Decimal::ONE_HUNDRED,
            timestamp: Utc::now(),
        };
        Arc::new(BalanceEvent {
            pool_id,
            change_type: BalanceChangeKind::BalanceChanged,
            amount: Decimal::from(10),
            balance_before: figures.clone(),
            balance_after: figures,
            related_entity_id: None,
            related_entity_type: None,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn filtered_subscribers_only_see_their_pool() {
        let listeners = EventListeners::default();
        let watched = PoolId::random();
        let other = PoolId::random();

        let mut mine = listeners.subscribe(watched);
        let mut all = listeners.subscribe_all();

        listeners.notify(&event(other));
        listeners.notify(&event(watched));

        assert_eq!(all.recv().await.unwrap().pool_id, other);
        assert_eq!(all.recv().await.unwrap().pool_id, watched);
        assert_eq!(mine.recv().await.unwrap().pool_id, watched);
        assert!(mine.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let listeners = EventListeners::default();
        let pool = PoolId::random();
        let events = listeners.subscribe(pool);
        assert_eq!(listeners.len(), 1);

        drop(events);
        listeners.notify(&event(pool));
        assert_eq!(listeners.len(), 0);
    }
}
