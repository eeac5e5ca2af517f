//! # Subscriber trait
//!
//! `Subscribe` is the extension point for reacting to supervision events (logs,
//! alerts, custom bookkeeping). Each subscriber is driven by its own worker task
//! fed by a bounded queue owned by the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Slow subscribers never block the supervisor or each other.
//! - On queue overflow, events for that subscriber are dropped (warn).
//!
//! ```rust
//! use fleetvisor::events::{Event, EventKind};
//! use fleetvisor::subscribers::Subscribe;
//!
//! struct ExitCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for ExitCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::UnitExited {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "exit-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        256
    }
}
