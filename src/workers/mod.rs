//! # Workers: named, independently runnable units.
//!
//! Every variant implements [`Worker`]. The supervisor and the command dispatcher
//! only ever see `Arc<dyn Worker>`.
//!
//! | Variant                | Type                    | `run(ctx)`                                       |
//! |------------------------|-------------------------|--------------------------------------------------|
//! | `TaskQueue`            | [`DurableWorker`]       | build connection + unit, poll until stopped      |
//! | `Cron`                 | [`DurableWorker`]       | as above, plus one scheduled-workflow start       |
//! | `WebServer`            | [`WebServerWorker`]     | serve an app through an [`HttpServer`](crate::servers::HttpServer) |
//! | `MessageConsumer`      | [`ConsumerWorker`]      | delegate to a [`BrokerApp`](crate::broker::BrokerApp) |
//! | `ExecOnce`             | [`ExecWorker`]          | call a callback once                             |
//!
//! ## Contract
//! - `run(ctx)` is called at most once; a second call fails with `AlreadyStarted`.
//! - Cancelling `ctx` has the same effect as `shutdown()`: graceful drain, then `Ok`.
//! - `shutdown()` with no active run phase fails with `NotRunning`; it never hangs
//!   longer than the worker's drain timeout.
//! - Exception: [`ExecWorker`] has no run phase to stop. Its callback runs to
//!   completion and its `shutdown()` always returns `Ok(())`.

mod consumer;
mod durable;
mod exec;
pub(crate) mod lifecycle;
mod web;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

pub use consumer::ConsumerWorker;
pub use durable::{CronMode, DurableWorker};
pub use exec::{ExecFn, ExecWorker};
pub use web::WebServerWorker;

/// Variant of a worker; decides which commands may dispatch it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    TaskQueue,
    Cron,
    WebServer,
    MessageConsumer,
    ExecOnce,
    /// User-provided [`Worker`] implementation.
    Custom,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::TaskQueue => "task-queue",
            WorkerKind::Cron => "cron",
            WorkerKind::WebServer => "web-server",
            WorkerKind::MessageConsumer => "message-consumer",
            WorkerKind::ExecOnce => "exec",
            WorkerKind::Custom => "custom",
        }
    }
}

/// How a worker's run phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// `run()` returned on its own.
    Clean,
    /// `run()` failed (build or run phase).
    Error,
    /// Stopped on request (ctx cancellation or `shutdown()`).
    Signal,
}

/// Lifecycle state. There is no transition back to `Registered`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Registered,
    Building,
    Active,
    Terminated(Termination),
}

impl WorkerState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, WorkerState::Terminated(_))
    }
}

/// A named unit of work the application can run.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Registry key.
    fn name(&self) -> &str;

    fn kind(&self) -> WorkerKind;

    /// Runs until the work ends or `ctx` is cancelled.
    async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError>;

    /// Gracefully stops an active run phase.
    async fn shutdown(&self) -> Result<(), WorkerError>;

    fn state(&self) -> WorkerState;

    /// Receiver that observes every state transition.
    fn subscribe_state(&self) -> watch::Receiver<WorkerState>;
}

impl fmt::Debug for dyn Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_worker(self, "Worker", f)
    }
}

/// Shared `Debug` rendering of the built-in workers.
pub(crate) fn debug_worker(w: &dyn Worker, ty: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct(ty)
        .field("name", &w.name())
        .field("kind", &w.kind())
        .field("state", &w.state())
        .finish_non_exhaustive()
}

/// Waits until `worker` reaches `Active` (or terminates first).
///
/// Returns the state that ended the wait.
pub async fn wait_until_active(worker: &dyn Worker) -> WorkerState {
    let mut rx = worker.subscribe_state();
    let result = rx
        .wait_for(|s| matches!(s, WorkerState::Active | WorkerState::Terminated(_)))
        .await
        .map(|s| *s);
    result.unwrap_or_else(|_| worker.state())
}
