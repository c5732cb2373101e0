//! Listener list and subscription handles.

use tokio::sync::mpsc;

/// Identifies one listener within an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<E> {
    id: ListenerId,
    tx: mpsc::UnboundedSender<E>,
}

/// Explicit list of listeners for one event source.
///
/// The bus is not synchronized itself; the owner keeps it inside the same
/// critical section as the state the events describe, so emission order
/// matches mutation order and clearing the list is atomic with a reset.
///
/// Sending never blocks, which keeps emission safe while a lock is held.
pub struct EventBus<E> {
    listeners: Vec<Listener<E>>,
    next_id: u64,
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Adds a listener and returns its subscription.
    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Listener { id, tx });
        Subscription { id, rx }
    }

    /// Removes a listener. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    /// Delivers `event` to every live listener.
    ///
    /// Listeners whose subscription was dropped are pruned. Returns the
    /// number of listeners that received the event.
    pub fn emit(&mut self, event: E) -> usize {
        self.listeners.retain(|l| l.tx.send(event.clone()).is_ok());
        self.listeners.len()
    }

    /// Detaches every listener. Their subscriptions observe end-of-stream
    /// once buffered events are drained.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of attached listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is attached.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Receiving end of one listener.
#[derive(Debug)]
pub struct Subscription<E> {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// The listener id, usable with [`EventBus::unsubscribe`].
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the listener has been
    /// detached and all buffered events were consumed.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Takes every buffered event.
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Whether the listener has been detached from its bus.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let mut bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(1), 2);
        assert_eq!(bus.emit(2), 2);

        assert_eq!(a.drain(), vec![1, 2]);
        assert_eq!(b.drain(), vec![1, 2]);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut bus = EventBus::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        assert_eq!(bus.emit("x"), 1);
        assert_eq!(bus.len(), 1);
        drop(keep);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));

        bus.emit(7);
        assert!(sub.try_recv().is_none());
        assert!(sub.is_closed());
    }

    #[test]
    fn test_clear_closes_subscriptions_after_buffered_events() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit(1);
        bus.clear();
        bus.emit(2);

        assert!(bus.is_empty());
        assert_eq!(sub.drain(), vec![1]);
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_cleared() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit(5u8);
        bus.clear();

        assert_eq!(sub.recv().await, Some(5));
        assert_eq!(sub.recv().await, None);
    }
}
