//! # Event bus for supervision events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: the supervisor publishes without
//! blocking, one listener forwards to the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ```text
//! Supervisor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; events without receivers are dropped.
//! - One shared ring buffer of `capacity` events; slow receivers observe
//!   `RecvError::Lagged(n)` and skip the `n` oldest.
//! - The bus closes when the last [`Bus`] is dropped. A [`WeakBus`] never keeps
//!   it open.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for supervision events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes to every current receiver.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver observing events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            tx: self.tx.downgrade(),
        }
    }
}

/// Publishing handle that does not keep the bus open.
#[derive(Clone, Debug)]
pub struct WeakBus {
    tx: broadcast::WeakSender<Event>,
}

impl WeakBus {
    /// Publishes if the bus is still open; drops `ev` otherwise.
    pub fn publish(&self, ev: Event) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::UnitStarted));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::AllStoppedWithin));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::AllStoppedWithin);
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_bus_open() {
        let bus = Bus::new(4);
        let weak = bus.downgrade();
        let mut rx = bus.subscribe();

        weak.publish(Event::new(EventKind::SubscriberOverflow));
        drop(bus);
        weak.publish(Event::new(EventKind::SubscriberPanicked));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::SubscriberOverflow);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
