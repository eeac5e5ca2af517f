//! # Application: composition root and command dispatch.
//!
//! An [`Application`] owns the [`WorkerRegistry`], the configuration, the log
//! pipeline and the collaborators every worker variant is built from. Workers are
//! admitted through the `add_*` methods (or the generic [`Application::register`])
//! and then dispatched by a [`Command`]:
//!
//! ```text
//! run <name>              → that worker, in this process (exit code = its status)
//! run <name> --workers N  → N child processes each running `run <name>`
//! run all                 → Supervisor::run_all over every non-exec worker
//! cron <name>             → a cron worker (schedules once, then idles)
//! exec <name>             → a one-off callback
//! ```
//!
//! ## Registration order of checks
//! 1. name rules ([`WorkerRegistry::check_name`]): reserved, invalid, conflict;
//! 2. variant payload (non-empty durable definition, cron both-or-neither);
//! 3. builder chain assembly (nothing connects yet);
//! 4. insertion.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::{BrokerApp, ConsumerOptions};
use crate::config::{AppConfig, UnitLimits};
use crate::connection::ConnectionBuilder;
use crate::core::{Supervisor, WorkerRegistry, run_to_exit_code, shutdown};
use crate::error::{RegistrationError, RuntimeError};
use crate::metrics_dir::ScratchDir;
use crate::runtime::RuntimeBuilder;
use crate::sdk::{ActivityRef, Connector, InterceptorRef, WorkflowRef};
use crate::servers::{Bind, ServerChoice, ServerRegistry, WebApp};
use crate::subscribers::{LogWriter, Subscribe};
use crate::telemetry::Telemetry;
use crate::unit::UnitBuilder;
use crate::workers::{
    ConsumerWorker, CronMode, DurableWorker, ExecFn, ExecWorker, WebServerWorker, Worker,
    WorkerKind,
};

/// Payload of a task-queue or cron worker.
///
/// Setting both `cron_schedule` and `cron_runner` makes a cron worker; setting
/// neither makes a plain task-queue worker.
#[derive(Clone, Debug, Default)]
pub struct DurableSpec {
    pub activities: Vec<ActivityRef>,
    pub workflows: Vec<WorkflowRef>,
    pub interceptors: Vec<InterceptorRef>,
    pub cron_schedule: Option<String>,
    pub cron_runner: Option<WorkflowRef>,
    /// Overrides the application-wide [`UnitLimits`].
    pub limits: Option<UnitLimits>,
}

impl DurableSpec {
    pub fn activities(activities: Vec<ActivityRef>) -> Self {
        Self {
            activities,
            ..Self::default()
        }
    }

    pub fn workflows(workflows: Vec<WorkflowRef>) -> Self {
        Self {
            workflows,
            ..Self::default()
        }
    }

    /// Adds a cron schedule and the workflow it starts.
    pub fn with_cron(mut self, schedule: impl Into<String>, runner: WorkflowRef) -> Self {
        self.cron_schedule = Some(schedule.into());
        self.cron_runner = Some(runner);
        self
    }
}

/// Variant and payload for [`Application::register`].
pub enum WorkerSpec {
    /// Task-queue or cron worker.
    Durable {
        task_queue: String,
        spec: DurableSpec,
    },
    WebServer {
        app: WebApp,
        bind: Bind,
        server: ServerChoice,
    },
    MessageConsumer {
        app: Arc<dyn BrokerApp>,
        options: ConsumerOptions,
    },
    ExecOnce(ExecFn),
}

/// What the application was asked to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one worker; `workers > 1` replicates it across child processes.
    Run { name: String, workers: usize },
    RunAll,
    Cron { name: String },
    Exec { name: String },
}

/// Builder for an [`Application`].
pub struct ApplicationBuilder {
    name: String,
    config: Option<AppConfig>,
    connector: Option<Arc<dyn Connector>>,
    servers: ServerRegistry,
    telemetry: Option<Telemetry>,
    subscribers: Option<Vec<Arc<dyn Subscribe>>>,
    program: Option<(PathBuf, Vec<OsString>)>,
}

impl ApplicationBuilder {
    /// Uses `config` instead of [`AppConfig::from_env`].
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Durable-execution connector shared by every task-queue and cron worker.
    ///
    /// Each worker still builds its own connection through it.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// HTTP server adapters available to web-server workers.
    pub fn servers(mut self, servers: ServerRegistry) -> Self {
        self.servers = servers;
        self
    }

    /// Log pipeline; defaults to one built from the configuration.
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Replaces the default [`LogWriter`] subscriber.
    pub fn subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = Some(subscribers);
        self
    }

    /// Program re-executed for process fan-out; defaults to the current executable.
    pub fn program(mut self, program: PathBuf, args: Vec<OsString>) -> Self {
        self.program = Some((program, args));
        self
    }

    pub fn build(self) -> Application {
        let config = self.config.unwrap_or_else(AppConfig::from_env);
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Telemetry::from_config(&config.log));
        let subscribers = self
            .subscribers
            .unwrap_or_else(|| vec![Arc::new(LogWriter) as Arc<dyn Subscribe>]);

        Application {
            name: self.name,
            config,
            connector: self.connector,
            servers: self.servers,
            registry: WorkerRegistry::new(),
            telemetry,
            subscribers,
            program: self.program,
        }
    }
}

/// Named collection of workers plus the means to run them.
pub struct Application {
    name: String,
    config: AppConfig,
    connector: Option<Arc<dyn Connector>>,
    servers: ServerRegistry,
    registry: WorkerRegistry,
    telemetry: Telemetry,
    subscribers: Vec<Arc<dyn Subscribe>>,
    program: Option<(PathBuf, Vec<OsString>)>,
}

impl Application {
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            name: name.into(),
            config: None,
            connector: None,
            servers: ServerRegistry::new(),
            telemetry: None,
            subscribers: None,
            program: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Registers a worker of any variant.
    pub fn register(
        &mut self,
        name: &str,
        spec: WorkerSpec,
    ) -> Result<Arc<dyn Worker>, RegistrationError> {
        let worker: Arc<dyn Worker> = match spec {
            WorkerSpec::Durable { task_queue, spec } => self.add_worker(name, task_queue, spec)?,
            WorkerSpec::WebServer { app, bind, server } => {
                self.add_web_worker(name, app, bind, server)?
            }
            WorkerSpec::MessageConsumer { app, options } => {
                self.add_consumer_worker(name, app, options)?
            }
            WorkerSpec::ExecOnce(callback) => self.add_exec(name, callback)?,
        };
        Ok(worker)
    }

    /// Registers a task-queue worker, or a cron worker when `spec` carries a schedule.
    ///
    /// The returned handle can still adjust its builders before the worker runs.
    pub fn add_worker(
        &mut self,
        name: &str,
        task_queue: impl Into<String>,
        spec: DurableSpec,
    ) -> Result<Arc<DurableWorker>, RegistrationError> {
        self.registry.check_name(name)?;
        if spec.activities.is_empty() && spec.workflows.is_empty() {
            return Err(RegistrationError::EmptyWorkerDefinition {
                name: name.to_string(),
            });
        }
        let cron = match (spec.cron_schedule, spec.cron_runner) {
            (Some(schedule), Some(runner)) => Some(CronMode { schedule, runner }),
            (None, None) => None,
            _ => {
                return Err(RegistrationError::IncompleteCron {
                    name: name.to_string(),
                });
            }
        };
        let connector = self
            .connector
            .clone()
            .ok_or_else(|| RegistrationError::MissingConnector {
                name: name.to_string(),
            })?;

        let mut connection = ConnectionBuilder::new(connector);
        connection.apply_defaults(&self.config.connection);

        let runtime =
            RuntimeBuilder::new(self.config.metrics.clone()).service_name(self.name.clone());

        let mut unit = UnitBuilder::new(task_queue);
        unit.set_activities(spec.activities)
            .set_workflows(spec.workflows)
            .set_interceptors(spec.interceptors)
            .set_limits(spec.limits.unwrap_or_else(|| self.config.limits.clone()));

        let worker = Arc::new(DurableWorker::new(name, connection, runtime, unit, cron));
        self.admit(worker)
    }

    /// Registers a web-server worker served by the adapter `server` resolves to.
    pub fn add_web_worker(
        &mut self,
        name: &str,
        app: WebApp,
        bind: Bind,
        server: ServerChoice,
    ) -> Result<Arc<WebServerWorker>, RegistrationError> {
        self.registry.check_name(name)?;
        let adapter = self.servers.resolve(&server)?;
        let drain = self.config.limits.graceful_shutdown_timeout;
        self.admit(Arc::new(WebServerWorker::new(name, app, bind, adapter, drain)))
    }

    /// Registers a message-consumer worker.
    pub fn add_consumer_worker(
        &mut self,
        name: &str,
        app: Arc<dyn BrokerApp>,
        options: ConsumerOptions,
    ) -> Result<Arc<ConsumerWorker>, RegistrationError> {
        self.registry.check_name(name)?;
        let drain = self.config.limits.graceful_shutdown_timeout;
        self.admit(Arc::new(ConsumerWorker::new(name, app, options, drain)))
    }

    /// Registers a callback dispatched by `exec <name>`.
    pub fn add_exec(
        &mut self,
        name: &str,
        callback: ExecFn,
    ) -> Result<Arc<ExecWorker>, RegistrationError> {
        self.registry.check_name(name)?;
        self.admit(Arc::new(ExecWorker::new(name, callback)))
    }

    /// Registers a user-defined worker under its own name.
    pub fn add_custom<W: Worker>(&mut self, worker: W) -> Result<Arc<W>, RegistrationError> {
        self.admit(Arc::new(worker))
    }

    fn admit<W: Worker>(&mut self, worker: Arc<W>) -> Result<Arc<W>, RegistrationError> {
        self.registry.insert(Arc::clone(&worker) as Arc<dyn Worker>)?;
        info!(app = %self.name, worker = worker.name(), kind = worker.kind().as_str(), "worker registered");
        Ok(worker)
    }

    /// Executes `command` until it completes or an OS termination signal arrives.
    ///
    /// Returns the process exit code.
    pub async fn run(&self, command: Command) -> Result<i32, RuntimeError> {
        self.run_until(command, shutdown::wait_for_shutdown_signal())
            .await
    }

    /// Like [`Application::run`], with `interrupt` in place of OS signals.
    pub async fn run_until<F>(&self, command: Command, interrupt: F) -> Result<i32, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        match command {
            Command::RunAll => self.run_all(interrupt).await,
            Command::Run { name, workers } => {
                let worker = self.lookup(&name)?;
                if worker.kind() == WorkerKind::ExecOnce {
                    return Err(wrong_variant(&name, "runnable", worker.kind()));
                }
                if workers > 1 {
                    self.replicate(&name, workers, interrupt).await
                } else {
                    self.run_one(worker, interrupt).await
                }
            }
            Command::Cron { name } => {
                let worker = self.lookup(&name)?;
                if worker.kind() != WorkerKind::Cron {
                    return Err(wrong_variant(&name, WorkerKind::Cron.as_str(), worker.kind()));
                }
                self.run_one(worker, interrupt).await
            }
            Command::Exec { name } => {
                let worker = self.lookup(&name)?;
                if worker.kind() != WorkerKind::ExecOnce {
                    return Err(wrong_variant(
                        &name,
                        WorkerKind::ExecOnce.as_str(),
                        worker.kind(),
                    ));
                }
                let code = self
                    .telemetry
                    .instrument(run_to_exit_code(worker, CancellationToken::new()))
                    .await;
                Ok(code)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Worker>, RuntimeError> {
        self.registry
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownWorker {
                name: name.to_string(),
            })
    }

    async fn run_one<F>(&self, worker: Arc<dyn Worker>, interrupt: F) -> Result<i32, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let ctx = CancellationToken::new();
        let name = worker.name().to_string();
        let run = self.telemetry.instrument(run_to_exit_code(worker, ctx.clone()));
        tokio::pin!(run);
        tokio::pin!(interrupt);

        let code = tokio::select! {
            code = &mut run => code,
            signal = &mut interrupt => {
                signal.map_err(RuntimeError::Signal)?;
                self.telemetry.in_scope(|| info!(worker = %name, "interrupt received; stopping"));
                ctx.cancel();
                run.await
            }
        };
        self.telemetry
            .in_scope(|| info!(worker = %name, exit_code = code, "worker finished"));
        Ok(code)
    }

    async fn run_all<F>(&self, interrupt: F) -> Result<i32, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let supervisor = self.supervisor(Vec::new());
        let report = self
            .telemetry
            .instrument(supervisor.run_all_until(self.registry.supervised(), interrupt))
            .await?;

        // Per-worker failures are logged; they do not change the exit code.
        self.telemetry.in_scope(|| {
            for failed in report.failures() {
                error!(unit = %failed.name, status = ?failed.status, forced = failed.forced, "worker did not exit cleanly");
            }
            info!(units = report.outcomes.len(), interrupted = report.interrupted, "supervision finished");
        });
        Ok(0)
    }

    async fn replicate<F>(&self, name: &str, count: usize, interrupt: F) -> Result<i32, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let scratch = self.telemetry.in_scope(ScratchDir::prepare);
        let (key, value) = scratch.child_env();
        let supervisor = self.supervisor(vec![(key, value)]);

        let report = self
            .telemetry
            .instrument(supervisor.run_replicas_until(name, count, interrupt))
            .await?;
        drop(scratch);
        Ok(report.worst_exit_code())
    }

    fn supervisor(&self, env: Vec<(OsString, Option<OsString>)>) -> Supervisor {
        let mut sup = Supervisor::new(
            self.config.supervisor.clone(),
            self.subscribers.clone(),
            self.telemetry.clone(),
        );
        if let Some((program, args)) = &self.program {
            sup = sup.with_program(program.clone(), args.clone());
        }
        for (key, value) in env {
            sup = sup.with_child_env(key, value);
        }
        sup
    }
}

fn wrong_variant(name: &str, expected: &'static str, actual: WorkerKind) -> RuntimeError {
    RuntimeError::WrongVariant {
        name: name.to_string(),
        expected,
        actual: actual.as_str(),
    }
}
