//! Typed event fan-out
//!
//! Replaces stringly-typed broadcast with enumerated event kinds over
//! bounded channels: subscribers register an `mpsc::Sender` and receive
//! every published event. Publishing is lossy for slow subscribers
//! (`try_send`) so a stalled observer can never stall playback.

use tokio::sync::mpsc;

/// Marker trait for event payloads
pub trait EngineEvent: Send + Sync + Clone + 'static {}

/// Fan-out publisher for one event type
pub struct EventPublisher<E: EngineEvent> {
    subscribers: Vec<mpsc::Sender<E>>,
}

impl<E: EngineEvent> EventPublisher<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a subscriber channel
    pub fn subscribe(&mut self, tx: mpsc::Sender<E>) {
        self.subscribers.push(tx);
    }

    /// Publish to every subscriber without blocking; slow subscribers
    /// miss events rather than applying backpressure here.
    pub fn publish(&self, event: E) {
        for tx in &self.subscribers {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: EngineEvent> Default for EventPublisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);
    impl EngineEvent for Ping {}

    #[tokio::test]
    async fn publishes_to_every_subscriber() {
        let mut publisher = EventPublisher::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        publisher.subscribe(tx1);
        publisher.subscribe(tx2);

        publisher.publish(Ping(7));
        assert_eq!(rx1.recv().await, Some(Ping(7)));
        assert_eq!(rx2.recv().await, Some(Ping(7)));
    }

    #[test]
    fn full_subscriber_does_not_block_publish() {
        let mut publisher = EventPublisher::new();
        let (tx, mut rx) = mpsc::channel(1);
        publisher.subscribe(tx);

        publisher.publish(Ping(1));
        publisher.publish(Ping(2)); // dropped, channel full

        assert_eq!(rx.try_recv().ok(), Some(Ping(1)));
        assert!(rx.try_recv().is_err());
    }
}
