//! # Durable-execution workers (task-queue and cron variants).
//!
//! A [`DurableWorker`] exclusively owns its builder triad. Nothing is built at
//! registration time; `run()` materializes everything:
//!
//! ```text
//! run(ctx)
//!   ├─ Registered → Building
//!   ├─ RuntimeBuilder::build()        telemetry (port conflict degrades)
//!   ├─ ConnectionBuilder::build()     handshake; failure → WorkerError::Build (exit 2)
//!   ├─ UnitBuilder::build()           pure assembly
//!   ├─ Building → Active
//!   ├─ [cron] start_cron_workflow()   exactly once; failure → ScheduleConflict
//!   └─ select!
//!        ├─ unit.run() returned       → Clean / Error
//!        └─ ctx or shutdown()         → unit.shutdown() + drain (bounded) → Signal
//! ```
//!
//! Connections and runtimes are never shared between workers, even when they
//! target the same endpoint.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::{ConnectionBuilder, ConnectionSettings};
use crate::error::{BuildError, SdkError, WorkerError};
use crate::runtime::{Runtime, RuntimeBuilder};
use crate::sdk::{CronStart, PollingUnit, WorkflowRef};
use crate::unit::UnitBuilder;

use super::lifecycle::Lifecycle;
use super::{Worker, WorkerKind, WorkerState};

/// Extra time `shutdown()` waits on top of the unit's drain timeout.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

/// Schedule of a cron worker. Both fields are always present together.
#[derive(Clone, Debug, PartialEq)]
pub struct CronMode {
    /// Cron expression, e.g. `"0 0 * * *"`.
    pub schedule: String,
    /// Workflow started on that schedule.
    pub runner: WorkflowRef,
}

/// Task-queue worker, optionally scheduling one cron workflow.
pub struct DurableWorker {
    lifecycle: Lifecycle,
    cron: Option<CronMode>,
    connection: Mutex<ConnectionBuilder>,
    runtime: Mutex<RuntimeBuilder>,
    unit: Mutex<UnitBuilder>,
}

impl DurableWorker {
    /// Creates a worker from its builders. `cron = None` makes a plain task-queue worker.
    pub fn new(
        name: impl Into<String>,
        connection: ConnectionBuilder,
        runtime: RuntimeBuilder,
        unit: UnitBuilder,
        cron: Option<CronMode>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            cron,
            connection: Mutex::new(connection),
            runtime: Mutex::new(runtime),
            unit: Mutex::new(unit),
        }
    }

    pub fn task_queue(&self) -> String {
        lock(&self.unit).task_queue().to_string()
    }

    pub fn cron(&self) -> Option<&CronMode> {
        self.cron.as_ref()
    }

    /// Settings the next connection would be built from.
    pub fn connection_settings(&self) -> ConnectionSettings {
        lock(&self.connection).settings().clone()
    }

    /// Names of the registered activities.
    pub fn activity_names(&self) -> Vec<String> {
        lock(&self.unit)
            .activities()
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Adjusts the connection builder. Only allowed before `run()`.
    pub fn configure_connection<F>(&self, f: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut ConnectionBuilder),
    {
        self.lifecycle.ensure_configurable()?;
        f(&mut lock(&self.connection));
        Ok(())
    }

    /// Adjusts the telemetry runtime builder. Only allowed before `run()`.
    pub fn configure_runtime<F>(&self, f: F) -> Result<(), WorkerError>
    where
        F: FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    {
        self.lifecycle.ensure_configurable()?;
        let mut guard = lock(&self.runtime);
        let current = std::mem::take(&mut *guard);
        *guard = f(current);
        Ok(())
    }

    /// Adjusts the unit builder. Only allowed before `run()`.
    pub fn configure_unit<F>(&self, f: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut UnitBuilder),
    {
        self.lifecycle.ensure_configurable()?;
        f(&mut lock(&self.unit));
        Ok(())
    }

    fn drain_timeout(&self) -> Duration {
        lock(&self.unit).limits().graceful_shutdown_timeout
    }

    async fn execute(&self, ctx: &CancellationToken) -> Result<(), WorkerError> {
        let started = Instant::now();
        let (mut connection, runtime, mut unit) = {
            let c = lock(&self.connection).clone();
            let r = lock(&self.runtime).clone();
            let u = lock(&self.unit).clone();
            (c, r, u)
        };
        let task_queue = unit.task_queue().to_string();

        let runtime = runtime.build().await.map_err(|e| self.build_failed(e, None))?;
        connection.set_runtime(runtime.clone());

        let conn = tokio::select! {
            built = connection.build() => built.map_err(|e| self.build_failed(e, Some(&runtime)))?,
            _ = self.lifecycle.stop_requested(ctx) => return Ok(()),
        };

        unit.set_client(conn.clone());
        let polling = unit.build().map_err(|e| self.build_failed(e, Some(&runtime)))?;
        let drain = unit.limits().graceful_shutdown_timeout;

        self.lifecycle.activate();
        runtime.metrics().incr("worker_runs", 1);
        runtime
            .metrics()
            .observe("worker_build_duration", started.elapsed());
        info!(
            worker = self.name(),
            task_queue = %task_queue,
            kind = self.kind().as_str(),
            metrics = runtime.metrics_enabled(),
            "worker active"
        );

        let mut run = polling.run();

        if let Some(cron) = &self.cron {
            let request = CronStart {
                workflow_id: format!("{}-{:016x}", self.name(), rand::random::<u64>()),
                workflow: cron.runner.clone(),
                task_queue: task_queue.clone(),
                schedule: cron.schedule.clone(),
            };
            let workflow_id = request.workflow_id.clone();

            tokio::select! {
                res = &mut run => return self.unit_returned(res, &runtime),
                started = conn.client().start_cron_workflow(request) => {
                    if let Err(source) = started {
                        if let Err(e) = self.drain(polling.as_ref(), &mut run, drain).await {
                            warn!(worker = self.name(), error = %e, "drain after schedule failure");
                        }
                        let source = BuildError::ScheduleConflict {
                            workflow: cron.runner.name().to_string(),
                            schedule: cron.schedule.clone(),
                            source,
                        };
                        error!(
                            worker = self.name(),
                            task_queue = %task_queue,
                            workflow = %cron.runner.name(),
                            schedule = %cron.schedule,
                            workflow_id = %workflow_id,
                            error = %source,
                            label = source.as_label(),
                            "cron workflow could not be scheduled"
                        );
                        runtime.metrics().incr("worker_build_failures", 1);
                        return Err(WorkerError::Build {
                            worker: self.name().to_string(),
                            source,
                        });
                    }
                }
            }
            info!(
                worker = self.name(),
                workflow_id = %workflow_id,
                schedule = %cron.schedule,
                "cron workflow scheduled"
            );
        }

        tokio::select! {
            res = &mut run => self.unit_returned(res, &runtime),
            _ = self.lifecycle.stop_requested(ctx) => {
                info!(worker = self.name(), drain = ?drain, "stopping worker");
                self.drain(polling.as_ref(), &mut run, drain).await
            }
        }
    }

    /// Shuts the unit down while its run future finishes, bounded by `drain`.
    async fn drain<F>(
        &self,
        unit: &dyn PollingUnit,
        run: F,
        drain: Duration,
    ) -> Result<(), WorkerError>
    where
        F: Future<Output = Result<(), SdkError>>,
    {
        let both = async { tokio::join!(unit.shutdown(), run) };
        match tokio::time::timeout(drain, both).await {
            Ok((Ok(()), _)) => Ok(()),
            Ok((Err(source), _)) => Err(WorkerError::Run {
                worker: self.name().to_string(),
                source,
            }),
            Err(_) => Err(WorkerError::DrainTimeout {
                worker: self.name().to_string(),
                timeout: drain,
            }),
        }
    }

    fn unit_returned(&self, res: Result<(), SdkError>, runtime: &Runtime) -> Result<(), WorkerError> {
        res.map_err(|source| {
            runtime.metrics().incr("worker_failures", 1);
            WorkerError::Run {
                worker: self.name().to_string(),
                source,
            }
        })
    }

    fn build_failed(&self, source: BuildError, runtime: Option<&Runtime>) -> WorkerError {
        if let Some(rt) = runtime {
            rt.metrics().incr("worker_build_failures", 1);
        }
        let settings = self.connection_settings();
        error!(
            worker = self.name(),
            task_queue = %self.task_queue(),
            target_host = %settings.target,
            namespace = %settings.namespace,
            error = %source,
            label = source.as_label(),
            "worker failed to build"
        );
        WorkerError::Build {
            worker: self.name().to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for DurableWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        super::debug_worker(self, "DurableWorker", f)
    }
}

#[async_trait]
impl Worker for DurableWorker {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn kind(&self) -> WorkerKind {
        match self.cron {
            Some(_) => WorkerKind::Cron,
            None => WorkerKind::TaskQueue,
        }
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError> {
        self.lifecycle.begin()?;
        let result = self.execute(&ctx).await;
        match &result {
            Ok(()) => info!(worker = self.name(), "worker stopped"),
            Err(WorkerError::Build { .. }) => {}
            Err(e) => error!(worker = self.name(), error = %e, label = e.as_label(), "worker failed"),
        }
        self.lifecycle.finish(&result);
        result
    }

    async fn shutdown(&self) -> Result<(), WorkerError> {
        self.lifecycle
            .shutdown(self.drain_timeout() + SHUTDOWN_SLACK)
            .await
    }

    fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.lifecycle.subscribe()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::run_to_exit_code;
    use crate::sdk::ActivityRef;
    use crate::telemetry::Telemetry;
    use crate::testing::{FakeClient, FakeConnector};
    use crate::workers::{Termination, wait_until_active};

    fn worker(connector: Arc<FakeConnector>, cron: Option<CronMode>) -> Arc<DurableWorker> {
        let mut unit = UnitBuilder::new("orders");
        unit.set_activities(vec![ActivityRef::named("charge")]);
        Arc::new(DurableWorker::new(
            "orders",
            ConnectionBuilder::new(connector),
            RuntimeBuilder::default(),
            unit,
            cron,
        ))
    }

    fn nightly() -> CronMode {
        CronMode {
            schedule: "0 0 * * *".into(),
            runner: WorkflowRef::named("Nightly"),
        }
    }

    #[tokio::test]
    async fn shutdown_drains_and_second_call_is_not_running() {
        let connector = Arc::new(FakeConnector::new());
        let w = worker(connector.clone(), None);

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.run(CancellationToken::new()).await }
        });
        assert_eq!(wait_until_active(w.as_ref()).await, WorkerState::Active);

        w.shutdown().await.unwrap();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(w.state(), WorkerState::Terminated(Termination::Signal));
        assert_eq!(connector.client().units()[0].shutdowns(), 1);

        let second = tokio::time::timeout(Duration::from_secs(1), w.shutdown())
            .await
            .expect("second shutdown must not hang");
        assert!(matches!(second, Err(WorkerError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn ctx_cancellation_stops_like_shutdown() {
        let w = worker(Arc::new(FakeConnector::new()), None);
        let ctx = CancellationToken::new();
        let handle = tokio::spawn({
            let (w, ctx) = (Arc::clone(&w), ctx.clone());
            async move { w.run(ctx).await }
        });
        wait_until_active(w.as_ref()).await;

        ctx.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(w.state(), WorkerState::Terminated(Termination::Signal));
    }

    #[tokio::test]
    async fn connection_failure_never_enters_poll_loop() {
        let connector = Arc::new(FakeConnector::failing("connection refused"));
        let w = worker(connector.clone(), None);

        let err = w.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(matches!(
            err,
            WorkerError::Build {
                source: BuildError::Connection { .. },
                ..
            }
        ));
        assert_eq!(w.state(), WorkerState::Terminated(Termination::Error));
        assert!(connector.client().units().is_empty());
    }

    #[tokio::test]
    async fn run_is_not_reentrant() {
        let w = worker(Arc::new(FakeConnector::failing("down")), None);
        let _ = w.run(CancellationToken::new()).await;
        assert!(matches!(
            w.run(CancellationToken::new()).await,
            Err(WorkerError::AlreadyStarted { .. })
        ));
        assert!(w.configure_unit(|_| {}).is_err());
    }

    #[tokio::test]
    async fn cron_worker_schedules_exactly_once() {
        let connector = Arc::new(FakeConnector::new());
        let w = worker(connector.clone(), Some(nightly()));
        assert_eq!(w.kind(), WorkerKind::Cron);

        let ctx = CancellationToken::new();
        let handle = tokio::spawn({
            let (w, ctx) = (Arc::clone(&w), ctx.clone());
            async move { w.run(ctx).await }
        });
        wait_until_active(w.as_ref()).await;

        // Let the start request go through before cancelling.
        let client = connector.client();
        while client.cron_starts().is_empty() {
            tokio::task::yield_now().await;
        }
        ctx.cancel();
        assert!(handle.await.unwrap().is_ok());

        let starts = client.cron_starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].schedule, "0 0 * * *");
        assert_eq!(starts[0].workflow.name(), "Nightly");
        assert!(starts[0].workflow_id.starts_with("orders-"));
    }

    #[tokio::test]
    async fn failed_schedule_is_a_schedule_conflict() {
        let connector = Arc::new(FakeConnector::with_client(
            FakeClient::new().with_cron_failure("already exists"),
        ));
        let w = worker(connector.clone(), Some(nightly()));

        let err = w.run(CancellationToken::new()).await.unwrap_err();
        match err {
            WorkerError::Build {
                source: BuildError::ScheduleConflict { workflow, .. },
                ..
            } => assert_eq!(workflow, "Nightly"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(connector.client().units()[0].shutdowns(), 1);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn telemetry(&self) -> Telemetry {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .finish();
            Telemetry::from_dispatch(tracing::Dispatch::new(subscriber))
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn schedule_conflict_is_logged_with_context() {
        let connector = Arc::new(FakeConnector::with_client(
            FakeClient::new().with_cron_failure("already exists"),
        ));
        let w = worker(connector.clone(), Some(nightly()));
        let logs = Captured::default();

        let code = logs
            .telemetry()
            .instrument(run_to_exit_code(w.clone(), CancellationToken::new()))
            .await;
        assert_eq!(code, 2);

        let text = logs.text();
        let line = text
            .lines()
            .find(|l| l.contains("cron workflow could not be scheduled"))
            .unwrap_or_else(|| panic!("no schedule failure logged in:\n{text}"));
        assert!(line.contains("ERROR"));
        assert!(line.contains("worker=\"orders\""));
        assert!(line.contains("task_queue=orders"));
        assert!(line.contains("workflow=Nightly"));
        assert!(line.contains("schedule=0 0 * * *"));
        assert!(line.contains("already exists"));
        assert!(line.contains("build_schedule_conflict"));
    }

    #[tokio::test]
    async fn build_duration_is_observed_once_active() {
        let connector = Arc::new(FakeConnector::new());
        let w = worker(connector.clone(), None);
        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.run(CancellationToken::new()).await }
        });
        wait_until_active(w.as_ref()).await;

        let runtimes = connector.runtimes_seen();
        let runtime = &runtimes[0];
        assert_eq!(runtime.metrics().get("worker_runs"), 1);
        assert_eq!(runtime.metrics().observations("worker_build_duration"), 1);

        w.shutdown().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn configuration_applies_before_start() {
        let connector = Arc::new(FakeConnector::new());
        let w = worker(connector.clone(), None);
        w.configure_connection(|c| {
            c.set_target("temporal.internal:7233").set_namespace("prod");
        })
        .unwrap();

        let handle = tokio::spawn({
            let w = Arc::clone(&w);
            async move { w.run(CancellationToken::new()).await }
        });
        wait_until_active(w.as_ref()).await;
        w.shutdown().await.unwrap();
        handle.await.unwrap().unwrap();

        let seen = connector.settings_seen();
        assert_eq!(seen[0].target, "temporal.internal:7233");
        assert_eq!(seen[0].namespace, "prod");
    }
}
