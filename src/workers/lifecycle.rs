//! Shared lifecycle bookkeeping for the built-in workers.
//!
//! ```text
//! Registered ──begin()──► Building ──activate()──► Active ──finish()──► Terminated(..)
//!      │                     │                                 ▲
//!      └── shutdown(): NotRunning                              │
//!                            └──── ctx / shutdown() ───────────┘
//! ```
//!
//! `begin()` succeeds exactly once; a worker is never restarted.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

use super::{Termination, WorkerState};

pub(crate) struct Lifecycle {
    name: String,
    state: watch::Sender<WorkerState>,
    stop: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (state, _rx) = watch::channel(WorkerState::Registered);
        Self {
            name: name.into(),
            state,
            stop: CancellationToken::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Fails with [`WorkerError::AlreadyStarted`] unless still `Registered`.
    pub(crate) fn ensure_configurable(&self) -> Result<(), WorkerError> {
        match self.state() {
            WorkerState::Registered => Ok(()),
            _ => Err(self.already_started()),
        }
    }

    /// Moves `Registered → Building`.
    pub(crate) fn begin(&self) -> Result<(), WorkerError> {
        let started = self.state.send_if_modified(|s| {
            if *s == WorkerState::Registered {
                *s = WorkerState::Building;
                true
            } else {
                false
            }
        });
        if started {
            Ok(())
        } else {
            Err(self.already_started())
        }
    }

    pub(crate) fn activate(&self) {
        self.state.send_replace(WorkerState::Active);
    }

    /// Records the terminal state derived from `result`.
    pub(crate) fn finish(&self, result: &Result<(), WorkerError>) {
        let term = match result {
            Err(_) => Termination::Error,
            Ok(()) if self.stop.is_cancelled() => Termination::Signal,
            Ok(()) => Termination::Clean,
        };
        self.state.send_replace(WorkerState::Terminated(term));
    }

    /// Completes when either the supervisor's `ctx` or `shutdown()` asks to stop.
    pub(crate) async fn stop_requested(&self, ctx: &CancellationToken) {
        tokio::select! {
            _ = ctx.cancelled() => self.stop.cancel(),
            _ = self.stop.cancelled() => {}
        }
    }

    /// Requests a stop and waits for the terminal state, bounded by `drain`.
    ///
    /// - never started or already terminated → [`WorkerError::NotRunning`]
    /// - stop already in progress → waits as well (second call is harmless)
    pub(crate) async fn shutdown(&self, drain: Duration) -> Result<(), WorkerError> {
        match self.state() {
            WorkerState::Building | WorkerState::Active => {}
            WorkerState::Registered | WorkerState::Terminated(_) => {
                return Err(WorkerError::NotRunning {
                    worker: self.name.clone(),
                });
            }
        }

        self.stop.cancel();
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(drain, async move {
            rx.wait_for(WorkerState::is_terminated).await.map(|_| ())
        })
        .await;

        match waited {
            Ok(_) => Ok(()),
            Err(_) => Err(WorkerError::DrainTimeout {
                worker: self.name.clone(),
                timeout: drain,
            }),
        }
    }

    fn already_started(&self) -> WorkerError {
        WorkerError::AlreadyStarted {
            worker: self.name.clone(),
        }
    }
}
