//! One-off exec commands.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::WorkerError;

use super::lifecycle::Lifecycle;
use super::{Worker, WorkerKind, WorkerState};

/// Zero-argument callback run by `exec <name>`.
pub type ExecFn = Arc<dyn Fn() -> Result<(), Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Invokes a callback once and terminates. `shutdown()` is a no-op.
pub struct ExecWorker {
    lifecycle: Lifecycle,
    callback: ExecFn,
}

impl ExecWorker {
    pub fn new(name: impl Into<String>, callback: ExecFn) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            callback,
        }
    }
}

impl std::fmt::Debug for ExecWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        super::debug_worker(self, "ExecWorker", f)
    }
}

#[async_trait]
impl Worker for ExecWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::ExecOnce
    }

    async fn run(&self, _ctx: CancellationToken) -> Result<(), WorkerError> {
        self.lifecycle.begin()?;
        self.lifecycle.activate();
        info!(exec = self.name(), "running exec");

        let result = (self.callback)().map_err(|e| WorkerError::Exec {
            worker: self.name().to_string(),
            reason: e.to_string(),
        });
        if let Err(e) = &result {
            error!(exec = self.name(), error = %e, "exec failed");
        }
        self.lifecycle.finish(&result);
        result
    }

    /// Always `Ok(())`, in any state: there is no run phase to interrupt.
    async fn shutdown(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.lifecycle.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::workers::Termination;

    #[tokio::test]
    async fn runs_callback_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let w = ExecWorker::new(
            "migrate",
            Arc::new(move || -> Result<(), Box<dyn Error + Send + Sync>> {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        w.run(CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(w.state(), WorkerState::Terminated(Termination::Clean));
        assert!(w.shutdown().await.is_ok());
        assert!(w.run(CancellationToken::new()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_error_becomes_exit_code_one() {
        let w = ExecWorker::new(
            "seed",
            Arc::new(|| -> Result<(), Box<dyn Error + Send + Sync>> { Err("no database".into()) }),
        );
        let err = w.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("no database"));
    }

    #[tokio::test]
    async fn shutdown_is_ok_in_every_state() {
        let noop: ExecFn = Arc::new(|| Ok(()));
        let w = ExecWorker::new("migrate", noop);
        assert!(w.shutdown().await.is_ok());
        assert_eq!(w.state(), WorkerState::Registered);

        w.run(CancellationToken::new()).await.unwrap();
        assert!(w.shutdown().await.is_ok());
    }
}
