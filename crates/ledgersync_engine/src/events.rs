//! Coordinator events and their fan-out.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the async event channel. Slow receivers see `Lagged`.
const CHANNEL_CAPACITY: usize = 64;

/// Something that happened in a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The server became reachable.
    Online,
    /// The server became unreachable.
    Offline,
    /// A cycle began.
    SyncStart,
    /// A cycle finished, successfully or not.
    SyncEnd,
    /// A cycle completed.
    SyncSuccess {
        /// When the cycle completed.
        at: DateTime<Utc>,
        /// Server version after the push, if a push happened.
        version: Option<u64>,
    },
    /// A cycle failed.
    SyncError(SyncError),
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Delivers events to synchronous listeners and to a broadcast channel.
///
/// A listener that panics is logged and skipped; the rest still receive the
/// event.
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Registers a listener.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Returns a receiver for every event emitted from now on.
    pub fn receiver(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers `event` to every listener, then to the channel.
    pub fn emit(&self, event: SyncEvent) {
        // Listeners may subscribe or unsubscribe from inside a callback.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(subscription = id.0, ?event, "sync listener panicked");
            }
        }

        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn delivers_to_every_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |event| seen.lock().push((n, event.clone())));
        }
        bus.emit(SyncEvent::Online);

        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));

        bus.subscribe(|_| panic!("listener bug"));
        let counter = Arc::clone(&seen);
        bus.subscribe(move |_| *counter.lock() += 1);

        bus.emit(SyncEvent::SyncStart);
        bus.emit(SyncEvent::SyncEnd);
        assert_eq!(*seen.lock(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = bus.subscribe(move |_| *counter.lock() += 1);

        bus.emit(SyncEvent::Online);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(SyncEvent::Offline);

        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_receiver_gets_events() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();
        bus.emit(SyncEvent::SyncError(SyncError::Timeout));
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::SyncError(SyncError::Timeout)
        );
    }
}
