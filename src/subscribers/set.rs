//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! ```text
//!    emit(&Event)
//!        │                        (Arc-clone per subscriber)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//! ```
//!
//! - `emit` returns immediately; per-subscriber order is FIFO.
//! - A panicking subscriber is isolated: the panic is logged and published as
//!   [`EventKind::SubscriberPanicked`], and the worker keeps going.
//! - A full queue drops the event for that subscriber only.
//! - Reports go out through a [`WeakBus`]: the set never keeps the bus open, so
//!   the listener feeding it ends once the publisher is gone.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, warn};

use crate::events::{Event, EventKind, WeakBus};
use crate::telemetry::Telemetry;

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: WeakBus,
}

impl SubscriberSet {
    /// Creates the set and spawns one worker per subscriber.
    ///
    /// Workers log through `telemetry`; panics inside subscribers are reported on `bus`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: WeakBus, telemetry: &Telemetry) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(telemetry.instrument(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(panic.as_ref());
                        error!(subscriber = name, panic = %info, "subscriber panicked");
                        // A panic while handling a panic report is not re-published.
                        if ev.kind != EventKind::SubscriberPanicked {
                            bus_for_worker.publish(Event::subscriber_panicked(name, info));
                        }
                    }
                }
            }));

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fans one event out to every subscriber without waiting.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            warn!(
                subscriber = channel.name,
                seq = ev.seq,
                reason,
                "subscriber dropped an event"
            );
            // Overflow reports are never re-published.
            if ev.kind != EventKind::SubscriberOverflow {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Closes every queue and waits until the workers have drained them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::events::Bus;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Collect {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "collect"
        }
    }

    struct Explode;

    #[async_trait]
    impl Subscribe for Explode {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "explode"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_affect_others() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let collect = Arc::new(Collect::default());
        let set = SubscriberSet::new(
            vec![
                Arc::new(Explode) as Arc<dyn Subscribe>,
                collect.clone() as Arc<dyn Subscribe>,
            ],
            bus.downgrade(),
            &Telemetry::disabled(),
        );

        set.emit(&Event::new(EventKind::UnitStarted));
        set.emit(&Event::new(EventKind::UnitExited));

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.kind, EventKind::SubscriberPanicked);
        assert_eq!(reported.reason.as_deref(), Some("boom"));

        set.shutdown().await;
        assert_eq!(
            *collect.0.lock().unwrap(),
            vec![EventKind::UnitStarted, EventKind::UnitExited]
        );
    }

    struct Stalled(tokio::sync::Semaphore);

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _ev: &Event) {
            let _ = self.0.acquire().await;
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn full_queue_is_reported_once_per_dropped_event() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let stalled = Arc::new(Stalled(tokio::sync::Semaphore::new(0)));
        let set = SubscriberSet::new(
            vec![stalled.clone() as Arc<dyn Subscribe>],
            bus.downgrade(),
            &Telemetry::disabled(),
        );

        // The worker holds at most one event in flight and one in the queue.
        for _ in 0..3 {
            set.emit(&Event::new(EventKind::UnitStarted));
        }
        let mut overflows = 0;
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.kind, EventKind::SubscriberOverflow);
            assert_eq!(ev.reason.as_deref(), Some("full"));
            overflows += 1;
        }
        assert!((1..=2).contains(&overflows));

        stalled.0.add_permits(16);
        set.shutdown().await;
    }
}
