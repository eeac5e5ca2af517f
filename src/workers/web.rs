//! Web-server worker: serves one [`WebApp`] through an [`HttpServer`] adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::WorkerError;
use crate::servers::{Bind, HttpServer, WebApp};

use super::lifecycle::Lifecycle;
use super::{Worker, WorkerKind, WorkerState};

/// Serves an application on `host:port` until stopped.
///
/// On stop the adapter's shutdown token is cancelled and the worker waits (up to
/// `drain`) for in-flight requests to finish.
pub struct WebServerWorker {
    lifecycle: Lifecycle,
    app: WebApp,
    bind: Bind,
    server: Arc<dyn HttpServer>,
    drain: Duration,
}

impl WebServerWorker {
    pub fn new(
        name: impl Into<String>,
        app: WebApp,
        bind: Bind,
        server: Arc<dyn HttpServer>,
        drain: Duration,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            app,
            bind,
            server,
            drain,
        }
    }

    pub fn bind(&self) -> &Bind {
        &self.bind
    }

    /// Key of the adapter serving this worker.
    pub fn server_name(&self) -> &str {
        self.server.name()
    }
}

impl std::fmt::Debug for WebServerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        super::debug_worker(self, "WebServerWorker", f)
    }
}

#[async_trait]
impl Worker for WebServerWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::WebServer
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError> {
        self.lifecycle.begin()?;
        let shutdown = CancellationToken::new();
        let mut serve = self
            .server
            .serve(self.app.clone(), self.bind.clone(), shutdown.clone());

        self.lifecycle.activate();
        info!(
            worker = self.name(),
            server = self.server.name(),
            bind = %self.bind,
            "web server active"
        );

        let result = tokio::select! {
            res = &mut serve => res.map_err(|source| WorkerError::Run {
                worker: self.name().to_string(),
                source,
            }),
            _ = self.lifecycle.stop_requested(&ctx) => {
                shutdown.cancel();
                match tokio::time::timeout(self.drain, &mut serve).await {
                    Ok(res) => res.map_err(|source| WorkerError::Run {
                        worker: self.name().to_string(),
                        source,
                    }),
                    Err(_) => Err(WorkerError::DrainTimeout {
                        worker: self.name().to_string(),
                        timeout: self.drain,
                    }),
                }
            }
        };

        if let Err(e) = &result {
            error!(worker = self.name(), error = %e, label = e.as_label(), "web server failed");
        }
        self.lifecycle.finish(&result);
        result
    }

    async fn shutdown(&self) -> Result<(), WorkerError> {
        self.lifecycle.shutdown(self.drain + Duration::from_secs(1)).await
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.lifecycle.subscribe()
    }
}
