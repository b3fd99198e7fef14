//! Event bus - synchronous in-process publish/subscribe
//!
//! Connects the order engine to the trade scheduler (order updates) and
//! the scheduler to its own subscribers (trade updates). Delivery is
//! synchronous and in subscription order; events are only posted after
//! the mutation they describe has been written to the ledger.

use crate::core::{BrokerOrder, TradeInfo};

/// Posted by the broker after a persisted order mutation.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order: BrokerOrder,
}

/// Posted by the trader after a persisted trade mutation.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub trade: TradeInfo,
}

/// A minimal synchronous pub/sub channel.
pub struct EventBus<E> {
    listeners: Vec<Box<dyn Fn(&E) + Send + Sync>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self { listeners: Vec::new() }
    }

    pub fn subscribe(&mut self, listener: impl Fn(&E) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Deliver to every listener, in subscription order.
    pub fn post(&self, event: &E) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivery_in_subscription_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut bus: EventBus<u32> = EventBus::new();

        let first = Arc::clone(&log);
        bus.subscribe(move |ev| first.lock().push(("first", *ev)));
        let second = Arc::clone(&log);
        bus.subscribe(move |ev| second.lock().push(("second", *ev)));

        bus.post(&7);
        assert_eq!(*log.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_post_without_listeners_is_noop() {
        let bus: EventBus<u32> = EventBus::new();
        bus.post(&1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_every_listener_sees_every_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bus: EventBus<&str> = EventBus::new();
        for _ in 0..3 {
            let c = Arc::clone(&count);
            bus.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.post(&"a");
        bus.post(&"b");
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }
}
