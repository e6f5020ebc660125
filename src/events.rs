//! Typed event bus between components and out to the host.
//!
//! Built on a broadcast channel: emission is fire-and-forget in the
//! caller's execution, and a receiver that lags, drops, or panics cannot
//! affect other receivers or the emitter. There is no replay for late
//! subscribers: consumers initialize from the facade's live reads and
//! then subscribe.

use crate::models::QueuedRequest;
use crate::transport::TransportResponse;
use tokio::sync::broadcast;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Events emitted by the queue, monitor, engine, and mediator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Effective reachability changed.
    NetworkChanged(bool),
    /// Queue size changed; carries the new size.
    QueueChanged(usize),
    /// A drain began.
    SyncStarted,
    /// A drain settled.
    SyncEnded,
    /// A drain found nothing to replay.
    QueueEmpty,
    /// A queued request was replayed successfully.
    RequestSucceeded {
        id: String,
        response: TransportResponse,
        request: QueuedRequest,
    },
    /// A queued request failed. `permanent` is true when the entry was
    /// removed from the queue (including retry exhaustion).
    RequestFailed {
        permanent: bool,
        request: QueuedRequest,
        error: String,
    },
    /// A queued request was cancelled by id.
    RequestCancelled(String),
}

/// Cloneable handle to the shared event channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers. Returns the number of receivers
    /// that got it; zero when nobody is listening.
    pub fn emit(&self, event: SyncEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::SyncStarted);
        bus.emit(SyncEvent::QueueChanged(3));

        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::SyncStarted));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::QueueChanged(3)
        ));
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(SyncEvent::SyncEnded), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new();
        let rx_dropped = bus.subscribe();
        let mut rx = bus.subscribe();
        drop(rx_dropped);

        bus.emit(SyncEvent::QueueEmpty);
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::QueueEmpty));
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::SyncStarted);

        let mut rx = bus.subscribe();
        bus.emit(SyncEvent::SyncEnded);
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::SyncEnded));
    }
}
