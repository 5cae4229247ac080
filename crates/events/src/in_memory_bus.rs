//! In-memory event bus for tests/dev.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// In-memory pub/sub bus.
///
/// Synchronous fan-out over `mpsc` channels; dead subscribers are dropped on
/// the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a (silent) subscription.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventEnvelope;
    use medledger_core::AggregateId;
    use uuid::Uuid;

    fn envelope(seq: u64) -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "inventory.product",
            seq,
            "inventory.product.registered",
            serde_json::json!({ "seq": seq }),
        )
    }

    #[test]
    fn every_subscriber_receives_every_message() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(envelope(1)).unwrap();
        bus.publish(envelope(2)).unwrap();

        let seqs_a: Vec<u64> = a.drain().iter().map(|e| e.sequence_number()).collect();
        let seqs_b: Vec<u64> = b.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs_a, vec![1, 2]);
        assert_eq!(seqs_b, vec![1, 2]);
    }

    #[test]
    fn dropped_subscribers_do_not_fail_publication() {
        let bus = InMemoryEventBus::new();
        drop(bus.subscribe());
        let live = bus.subscribe();

        bus.publish(envelope(1)).unwrap();
        assert_eq!(live.drain().len(), 1);
    }
}
