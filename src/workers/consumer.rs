//! Message-consumer worker: delegates to a [`BrokerApp`] run loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerApp, ConsumerOptions};
use crate::error::WorkerError;

use super::lifecycle::Lifecycle;
use super::{Worker, WorkerKind, WorkerState};

pub struct ConsumerWorker {
    lifecycle: Lifecycle,
    app: Arc<dyn BrokerApp>,
    options: ConsumerOptions,
    drain: Duration,
}

impl ConsumerWorker {
    pub fn new(
        name: impl Into<String>,
        app: Arc<dyn BrokerApp>,
        options: ConsumerOptions,
        drain: Duration,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            app,
            options,
            drain,
        }
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        super::debug_worker(self, "ConsumerWorker", f)
    }
}

#[async_trait]
impl Worker for ConsumerWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::MessageConsumer
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError> {
        self.lifecycle.begin()?;
        let mut consume = self.app.run(&self.options);
        self.lifecycle.activate();
        info!(worker = self.name(), "consumer active");

        let result = tokio::select! {
            res = &mut consume => res.map_err(|source| WorkerError::Run {
                worker: self.name().to_string(),
                source,
            }),
            _ = self.lifecycle.stop_requested(&ctx) => {
                if let Err(e) = self.app.stop().await {
                    warn!(worker = self.name(), error = %e, "broker stop request failed");
                }
                match tokio::time::timeout(self.drain, &mut consume).await {
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
            error!(worker = self.name(), error = %e, label = e.as_label(), "consumer failed");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBroker;
    use crate::workers::wait_until_active;

    #[tokio::test]
    async fn stop_goes_through_the_broker() {
        let broker = Arc::new(FakeBroker::new());
        let w = Arc::new(ConsumerWorker::new(
            "events",
            broker.clone(),
            ConsumerOptions::default().with("queue", "orders"),
            Duration::from_secs(5),
        ));

        let ctx = CancellationToken::new();
        let handle = tokio::spawn({
            let (w, ctx) = (Arc::clone(&w), ctx.clone());
            async move { w.run(ctx).await }
        });
        wait_until_active(w.as_ref()).await;

        ctx.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(broker.stops(), 1);
        assert_eq!(broker.options_seen()[0].extra["queue"], "orders");
    }

    #[tokio::test]
    async fn broker_failure_is_a_run_error() {
        let w = ConsumerWorker::new(
            "events",
            Arc::new(FakeBroker::failing("channel closed")),
            ConsumerOptions::default(),
            Duration::from_secs(1),
        );
        let err = w.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.as_label(), "worker_run_failed");
    }
}
