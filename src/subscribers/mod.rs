//! # Event subscribers.
//!
//! ```text
//! Supervisor ── publish(Event) ──► Bus ──► SubscriberSet::emit
//!                                              ├──► LogWriter (tracing)
//!                                              └──► custom Subscribe impls
//! ```
//!
//! Implement [`Subscribe`] to plug in alerting or bookkeeping; [`LogWriter`] is
//! installed by default by the application.

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
