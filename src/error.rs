//! Error types used by the fleetvisor application, its workers and the supervisor.
//!
//! This module defines the error taxonomy in the order errors can occur:
//!
//! - [`RegistrationError`] raised synchronously when a worker is admitted.
//! - [`BuildError`] raised when a worker materializes its runtime dependencies.
//! - [`WorkerError`] the terminal error of one worker's `run()` / `shutdown()`.
//! - [`RuntimeError`] errors of the supervision loop and command dispatch itself.
//! - [`SdkError`] the opaque error returned by external collaborators.
//!
//! Every enum provides `as_label()` (stable snake_case, for logs/metrics).

use std::time::Duration;

use thiserror::Error;

/// Opaque failure reported by an external collaborator (durable-execution SDK,
/// HTTP server adapter, broker client).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SdkError {
    /// Human-readable message from the collaborator.
    pub message: String,
}

impl SdkError {
    /// Creates a new error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// # Errors raised while admitting a worker into the registry.
///
/// These are startup-configuration bugs: they are always fatal to the
/// registration call and never silently ignored.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The name belongs to the reserved command vocabulary.
    #[error("worker name '{name}' is reserved")]
    NameReserved {
        /// Rejected name.
        name: String,
    },

    /// Another worker is already registered under this name.
    #[error("worker name '{name}' is already registered")]
    NameConflict {
        /// Rejected name.
        name: String,
    },

    /// The name is empty or contains whitespace.
    #[error("worker name '{name}' is not a valid command name")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// A durable worker without activities and without workflows.
    #[error("worker '{name}' must define at least one workflow or activity")]
    EmptyWorkerDefinition {
        /// Worker name.
        name: String,
    },

    /// Only one of `cron_schedule` / `cron_runner` was provided.
    #[error("worker '{name}': cron schedule and cron runner must be set together")]
    IncompleteCron {
        /// Worker name.
        name: String,
    },

    /// A durable worker was registered on an application without a connector.
    #[error("worker '{name}' needs a durable-execution connector, but none is configured")]
    MissingConnector {
        /// Worker name.
        name: String,
    },

    /// No HTTP server adapter is available for the requested choice.
    #[error("no http server adapter available for '{requested}'")]
    ServerUnavailable {
        /// Requested adapter key (`auto` for automatic choice).
        requested: String,
    },
}

impl RegistrationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistrationError::NameReserved { .. } => "registration_name_reserved",
            RegistrationError::NameConflict { .. } => "registration_name_conflict",
            RegistrationError::InvalidName { .. } => "registration_invalid_name",
            RegistrationError::EmptyWorkerDefinition { .. } => "registration_empty_definition",
            RegistrationError::IncompleteCron { .. } => "registration_incomplete_cron",
            RegistrationError::MissingConnector { .. } => "registration_missing_connector",
            RegistrationError::ServerUnavailable { .. } => "registration_server_unavailable",
        }
    }
}

/// # Errors raised while a worker builds its client, runtime and unit.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The durable-execution endpoint was unreachable or rejected the handshake.
    #[error("cannot connect to {target} (namespace {namespace}): {source}")]
    Connection {
        /// Target endpoint.
        target: String,
        /// Namespace.
        namespace: String,
        /// Collaborator error.
        #[source]
        source: SdkError,
    },

    /// A runnable unit was assembled without a connection.
    #[error("runnable unit for task queue '{task_queue}' has no client connection")]
    MissingClient {
        /// Task queue the unit would have polled.
        task_queue: String,
    },

    /// Starting the scheduled workflow failed (e.g. it is already registered).
    #[error("cannot start cron workflow '{workflow}' with schedule '{schedule}': {source}")]
    ScheduleConflict {
        /// Runner workflow type.
        workflow: String,
        /// Cron expression.
        schedule: String,
        /// Collaborator error.
        #[source]
        source: SdkError,
    },

    /// The telemetry runtime could not be built (other than a port conflict).
    #[error("cannot build telemetry runtime: {reason}")]
    Telemetry {
        /// Failure description.
        reason: String,
    },

    /// The SDK refused to assemble the unit.
    #[error("cannot assemble unit for task queue '{task_queue}': {source}")]
    Unit {
        /// Task queue.
        task_queue: String,
        /// Collaborator error.
        #[source]
        source: SdkError,
    },
}

impl BuildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::Connection { .. } => "build_connection",
            BuildError::MissingClient { .. } => "build_missing_client",
            BuildError::ScheduleConflict { .. } => "build_schedule_conflict",
            BuildError::Telemetry { .. } => "build_telemetry",
            BuildError::Unit { .. } => "build_unit",
        }
    }
}

/// # Terminal errors of a single worker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Building dependencies failed; the run phase was never entered.
    #[error("worker '{worker}' failed to build: {source}")]
    Build {
        /// Worker name.
        worker: String,
        /// Build failure.
        #[source]
        source: BuildError,
    },

    /// The run phase failed.
    #[error("worker '{worker}' failed: {source}")]
    Run {
        /// Worker name.
        worker: String,
        /// Collaborator error.
        #[source]
        source: SdkError,
    },

    /// `shutdown()` was called while no run phase is active.
    #[error("worker '{worker}' is not running")]
    NotRunning {
        /// Worker name.
        worker: String,
    },

    /// `run()` or a `configure_*` call on a worker that already started.
    #[error("worker '{worker}' has already been started")]
    AlreadyStarted {
        /// Worker name.
        worker: String,
    },

    /// The worker's future panicked.
    #[error("worker '{worker}' panicked: {info}")]
    Panicked {
        /// Worker name.
        worker: String,
        /// Panic payload, when it was a string.
        info: String,
    },

    /// The worker did not finish draining within the allotted time.
    #[error("worker '{worker}' did not drain within {timeout:?}")]
    DrainTimeout {
        /// Worker name.
        worker: String,
        /// Drain budget.
        timeout: Duration,
    },

    /// A one-off exec callback returned an error.
    #[error("exec '{worker}' failed: {reason}")]
    Exec {
        /// Exec name.
        worker: String,
        /// Callback error text.
        reason: String,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Build { .. } => "worker_build_failed",
            WorkerError::Run { .. } => "worker_run_failed",
            WorkerError::NotRunning { .. } => "worker_not_running",
            WorkerError::AlreadyStarted { .. } => "worker_already_started",
            WorkerError::Panicked { .. } => "worker_panicked",
            WorkerError::DrainTimeout { .. } => "worker_drain_timeout",
            WorkerError::Exec { .. } => "worker_exec_failed",
        }
    }

    /// Process exit code reported for this terminal error.
    ///
    /// Build failures are distinguished from run failures so that an operator
    /// can tell "never became active" from "crashed while active".
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerError::Build { .. } => 2,
            WorkerError::Panicked { .. } => 101,
            _ => 1,
        }
    }
}

/// # Errors produced by the supervision loop and command dispatch.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS signal listeners could not be installed.
    #[error("cannot install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// A run-unit could not be started.
    #[error("cannot start unit '{unit}': {source}")]
    Spawn {
        /// Worker name.
        unit: String,
        /// Spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// A run-unit could not be forcibly terminated.
    #[error("cannot kill unit '{unit}': {source}")]
    Kill {
        /// Worker name.
        unit: String,
        /// Kill failure.
        #[source]
        source: std::io::Error,
    },

    /// The command names a worker that is not registered.
    #[error("no worker named '{name}' is registered")]
    UnknownWorker {
        /// Requested name.
        name: String,
    },

    /// The command targets a worker of the wrong variant.
    #[error("worker '{name}' is a {actual} worker, expected {expected}")]
    WrongVariant {
        /// Requested name.
        name: String,
        /// Variant required by the command.
        expected: &'static str,
        /// Variant of the registered worker.
        actual: &'static str,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Spawn { .. } => "runtime_spawn",
            RuntimeError::Kill { .. } => "runtime_kill",
            RuntimeError::UnknownWorker { .. } => "runtime_unknown_worker",
            RuntimeError::WrongVariant { .. } => "runtime_wrong_variant",
        }
    }
}
