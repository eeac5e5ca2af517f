//! Supervision events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`, and its non-owning [`WeakBus`]
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (unit and shutdown events), `SubscriberSet`
//!   (overflow/panic).
//! - **Consumers**: the supervisor's listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::{Bus, WeakBus};
pub use event::{Event, EventKind};
