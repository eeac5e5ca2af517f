//! # Logging subscriber.
//!
//! [`LogWriter`] renders supervision events through `tracing`:
//!
//! ```text
//! INFO  unit started        unit=billing pid=4242
//! INFO  unit exited         unit=billing exit_code=0
//! ERROR unit exited         unit=reports exit_code=2
//! WARN  shutdown requested  grace_ms=60000
//! WARN  unit killed after grace period  unit=api grace_ms=60000
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Writes every supervision event to the active `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let unit = e.unit.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::UnitStarted => info!(unit, pid = ?e.pid, "unit started"),
            EventKind::UnitExited => match e.exit_code {
                Some(0) => info!(unit, exit_code = 0, "unit exited"),
                Some(code) => error!(unit, exit_code = code, "unit exited"),
                None => warn!(unit, reason = ?e.reason, "unit terminated by signal"),
            },
            EventKind::UnitKilled => {
                warn!(unit, grace_ms = ?e.grace_ms, "unit killed after grace period")
            }
            EventKind::ShutdownRequested => warn!(grace_ms = ?e.grace_ms, "shutdown requested"),
            EventKind::AllStoppedWithin => info!("all units stopped within grace period"),
            EventKind::GraceExceeded => {
                warn!(stuck = ?e.reason, grace_ms = ?e.grace_ms, "grace period exceeded")
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = unit, reason = ?e.reason, "subscriber panicked")
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = unit, reason = ?e.reason, "subscriber dropped an event")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }

    fn queue_capacity(&self) -> usize {
        1024
    }
}
