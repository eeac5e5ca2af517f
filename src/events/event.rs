//! # Supervision events.
//!
//! The [`EventKind`] enum classifies what the supervisor observed:
//! - **Unit events**: a run-unit started, exited or had to be killed
//! - **Shutdown events**: interrupt received, all units stopped (or grace exceeded)
//! - **Subscriber events**: a subscriber panicked or dropped an event
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use fleetvisor::events::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::UnitExited)
//!     .with_unit("billing")
//!     .with_exit_code(2);
//!
//! assert_eq!(ev.unit.as_deref(), Some("billing"));
//! assert_eq!(ev.exit_code, Some(2));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervision events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Unit events ===
    /// A run-unit was launched.
    ///
    /// Sets:
    /// - `unit`: worker name
    /// - `pid`: child process id (process fan-out only)
    UnitStarted,

    /// A run-unit finished.
    ///
    /// Sets:
    /// - `unit`: worker name
    /// - `exit_code`: exit code (absent when terminated by a signal)
    /// - `reason`: `"signal"` when terminated by a signal
    UnitExited,

    /// A run-unit outlived the grace period and was killed.
    ///
    /// Sets:
    /// - `unit`: worker name
    /// - `grace_ms`: grace period that was exceeded
    UnitKilled,

    // === Shutdown events ===
    /// Interrupt observed; shutdown is being broadcast.
    ///
    /// Sets:
    /// - `grace_ms`: grace period granted to the units
    ShutdownRequested,

    /// Every unit stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; remaining units are killed.
    ///
    /// Sets:
    /// - `reason`: comma-separated names of the units still alive
    /// - `grace_ms`: grace period
    GraceExceeded,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `unit`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `unit`: subscriber name
    /// - `reason`: `"full"` or `"closed"`
    SubscriberOverflow,
}

/// Supervision event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Worker (or subscriber) name, if applicable.
    pub unit: Option<Arc<str>>,
    /// Exit code of a finished unit.
    pub exit_code: Option<i32>,
    /// OS process id of a unit.
    pub pid: Option<u32>,
    /// Grace period in milliseconds (compact).
    pub grace_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            unit: None,
            exit_code: None,
            pid: None,
            grace_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches a grace period (stored as milliseconds).
    #[inline]
    pub fn with_grace(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.grace_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_unit(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_unit(subscriber)
            .with_reason(info)
    }
}
