//! In-process event relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("relay lock poisoned")]
    Poisoned,

    /// The relay was taken offline (see `InMemoryEventBus::set_reachable`).
    #[error("relay unreachable")]
    Unreachable,
}

/// In-memory pub/sub relay.
///
/// - No IO / no async
/// - Best-effort fan-out; dead subscribers are pruned on publish
/// - Can be switched "unreachable" to exercise best-effort publishing
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    reachable: AtomicBool,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the relay going down (`false`) or coming back (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(InMemoryBusError::Unreachable);
        }

        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        let before = subs.len();
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        if subs.len() < before {
            debug!(pruned = before - subs.len(), "dropped disconnected subscribers");
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still hands out a subscription; it just never
        // receives anything.
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(_) => warn!("relay lock poisoned; subscription will stay silent"),
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn unreachable_relay_rejects_publish_and_recovers() {
        let bus = InMemoryEventBus::<u32>::new();
        let sub = bus.subscribe();

        bus.set_reachable(false);
        assert_eq!(bus.publish(1), Err(InMemoryBusError::Unreachable));
        assert!(sub.try_recv().is_err());

        bus.set_reachable(true);
        bus.publish(2).unwrap();
        assert_eq!(sub.try_recv().unwrap(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(3).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), 3);
    }
}
