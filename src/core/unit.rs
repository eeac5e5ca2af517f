//! # Run-units: the supervisor's handles to running workers.
//!
//! [`RunUnit`] hides whether a worker runs as a tokio task in this process
//! ([`TaskUnit`]) or as a child process re-executing `run <name>` ([`ProcessUnit`]).
//! The fan-out mode is chosen once; the supervisor never branches on it afterwards.
//!
//! | Operation            | TaskUnit                       | ProcessUnit                       |
//! |----------------------|--------------------------------|-----------------------------------|
//! | `request_shutdown()` | cancel the worker's ctx token  | `SIGTERM` (kill where unsupported) |
//! | `kill()`             | abort the task                 | `SIGKILL`                         |
//! | `status()`           | join result, non-blocking      | `try_wait()`                      |
//!
//! Exit codes of task units follow [`WorkerError::exit_code`](crate::error::WorkerError::exit_code);
//! a panic maps to 101 and an aborted task reports [`UnitStatus::Signaled`].

use std::ffi::OsString;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::process::{Child, Command};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::shutdown::{TerminateOutcome, request_terminate};
use crate::error::RuntimeError;
use crate::subscribers::panic_message;
use crate::telemetry::Telemetry;
use crate::workers::Worker;

/// Exit code reported for a panicking worker.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Observable state of a run-unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitStatus {
    Running,
    Exited(i32),
    /// Terminated by a signal (process) or aborted (task).
    Signaled,
}

impl UnitStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, UnitStatus::Running)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            UnitStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<ExitStatus> for UnitStatus {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => UnitStatus::Exited(code),
            None => UnitStatus::Signaled,
        }
    }
}

/// Handle to one concurrently executing worker.
#[async_trait]
pub trait RunUnit: Send {
    /// Worker name.
    fn name(&self) -> &str;

    /// OS process id, for process units.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Non-blocking status check.
    fn status(&mut self) -> UnitStatus;

    /// Best-effort graceful stop.
    fn request_shutdown(&mut self) -> Result<(), RuntimeError>;

    /// Forcible termination.
    fn kill(&mut self) -> Result<(), RuntimeError>;

    /// Waits until the unit has terminated.
    async fn wait(&mut self) -> UnitStatus;
}

/// Runs `worker` to completion and maps the outcome to an exit code.
///
/// A panic inside the worker is caught and reported as [`PANIC_EXIT_CODE`].
pub async fn run_to_exit_code(worker: Arc<dyn Worker>, ctx: CancellationToken) -> i32 {
    let name = worker.name().to_string();
    match std::panic::AssertUnwindSafe(worker.run(ctx)).catch_unwind().await {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => e.exit_code(),
        Err(panic) => {
            error!(worker = %name, panic = %panic_message(panic.as_ref()), "worker panicked");
            PANIC_EXIT_CODE
        }
    }
}

/// A worker running as a tokio task in this process.
pub struct TaskUnit {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<i32>,
    done: Option<UnitStatus>,
}

impl TaskUnit {
    /// Spawns `worker.run(token)` with `telemetry` as its log dispatcher.
    pub fn spawn(worker: Arc<dyn Worker>, token: CancellationToken, telemetry: &Telemetry) -> Self {
        let name = worker.name().to_string();
        let ctx = token.clone();
        let handle = tokio::spawn(telemetry.instrument(run_to_exit_code(worker, ctx)));
        Self {
            name,
            token,
            handle,
            done: None,
        }
    }

    fn settle(&mut self, joined: Result<i32, JoinError>) -> UnitStatus {
        let status = match joined {
            Ok(code) => UnitStatus::Exited(code),
            Err(e) if e.is_panic() => UnitStatus::Exited(PANIC_EXIT_CODE),
            Err(_) => UnitStatus::Signaled,
        };
        self.done = Some(status);
        status
    }
}

#[async_trait]
impl RunUnit for TaskUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&mut self) -> UnitStatus {
        if let Some(status) = self.done {
            return status;
        }
        if !self.handle.is_finished() {
            return UnitStatus::Running;
        }
        match (&mut self.handle).now_or_never() {
            Some(joined) => self.settle(joined),
            None => UnitStatus::Running,
        }
    }

    fn request_shutdown(&mut self) -> Result<(), RuntimeError> {
        self.token.cancel();
        Ok(())
    }

    fn kill(&mut self) -> Result<(), RuntimeError> {
        self.handle.abort();
        Ok(())
    }

    async fn wait(&mut self) -> UnitStatus {
        if let Some(status) = self.done {
            return status;
        }
        let joined = (&mut self.handle).await;
        self.settle(joined)
    }
}

/// A worker running as a child process (`<program> <args..> run <name>`).
pub struct ProcessUnit {
    name: String,
    child: Child,
    done: Option<UnitStatus>,
}

impl ProcessUnit {
    /// Spawns the child. `args` precede the `run <name>` command.
    ///
    /// `env` entries are set (`Some`) or removed (`None`) in the child's environment.
    pub fn spawn(
        name: &str,
        program: &Path,
        args: &[OsString],
        env: &[(OsString, Option<OsString>)],
    ) -> Result<Self, RuntimeError> {
        let mut cmd = Command::new(program);
        cmd.args(args).arg("run").arg(name).kill_on_drop(true);
        for (key, value) in env {
            match value {
                Some(v) => cmd.env(key, v),
                None => cmd.env_remove(key),
            };
        }
        let child = cmd
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                unit: name.to_string(),
                source,
            })?;
        Ok(Self {
            name: name.to_string(),
            child,
            done: None,
        })
    }

    fn kill_error(&self, source: std::io::Error) -> RuntimeError {
        RuntimeError::Kill {
            unit: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl RunUnit for ProcessUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn status(&mut self) -> UnitStatus {
        if let Some(status) = self.done {
            return status;
        }
        match self.child.try_wait() {
            Ok(Some(exit)) => {
                let status = UnitStatus::from(exit);
                self.done = Some(status);
                status
            }
            Ok(None) => UnitStatus::Running,
            Err(e) => {
                warn!(unit = %self.name, error = %e, "cannot poll child process");
                UnitStatus::Running
            }
        }
    }

    fn request_shutdown(&mut self) -> Result<(), RuntimeError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match request_terminate(pid) {
            Ok(TerminateOutcome::Sent | TerminateOutcome::NotRunning) => Ok(()),
            Ok(TerminateOutcome::Unsupported) => self.kill(),
            Err(e) => Err(self.kill_error(e)),
        }
    }

    fn kill(&mut self) -> Result<(), RuntimeError> {
        if self.done.is_some() || self.child.id().is_none() {
            return Ok(());
        }
        self.child.start_kill().map_err(|e| self.kill_error(e))
    }

    async fn wait(&mut self) -> UnitStatus {
        if let Some(status) = self.done {
            return status;
        }
        let status = match self.child.wait().await {
            Ok(exit) => UnitStatus::from(exit),
            Err(e) => {
                warn!(unit = %self.name, error = %e, "cannot wait for child process");
                UnitStatus::Signaled
            }
        };
        self.done = Some(status);
        status
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::WorkerError;
    use crate::workers::{WorkerKind, WorkerState};

    struct Scripted {
        outcome: fn() -> Result<(), WorkerError>,
    }

    #[async_trait]
    impl Worker for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn kind(&self) -> WorkerKind {
            WorkerKind::Custom
        }
        async fn run(&self, ctx: CancellationToken) -> Result<(), WorkerError> {
            let out = (self.outcome)();
            if out.is_ok() {
                ctx.cancelled().await;
            }
            out
        }
        async fn shutdown(&self) -> Result<(), WorkerError> {
            Ok(())
        }
        fn state(&self) -> WorkerState {
            WorkerState::Registered
        }
        fn subscribe_state(&self) -> tokio::sync::watch::Receiver<WorkerState> {
            tokio::sync::watch::channel(WorkerState::Registered).1
        }
    }

    fn spawn(outcome: fn() -> Result<(), WorkerError>) -> TaskUnit {
        TaskUnit::spawn(
            Arc::new(Scripted { outcome }),
            CancellationToken::new(),
            &Telemetry::disabled(),
        )
    }

    #[tokio::test]
    async fn shutdown_request_ends_with_zero() {
        let mut unit = spawn(|| Ok(()));
        assert_eq!(unit.status(), UnitStatus::Running);
        unit.request_shutdown().unwrap();
        assert_eq!(unit.wait().await, UnitStatus::Exited(0));
        assert_eq!(unit.status(), UnitStatus::Exited(0));
    }

    #[tokio::test]
    async fn worker_error_maps_to_its_exit_code() {
        let mut unit = spawn(|| {
            Err(WorkerError::NotRunning {
                worker: "scripted".into(),
            })
        });
        assert_eq!(unit.wait().await, UnitStatus::Exited(1));
    }

    #[tokio::test]
    async fn panic_maps_to_101() {
        let mut unit = spawn(|| panic!("bad state"));
        assert_eq!(unit.wait().await, UnitStatus::Exited(PANIC_EXIT_CODE));
    }

    #[tokio::test]
    async fn kill_reports_signaled() {
        let mut unit = spawn(|| Ok(()));
        unit.kill().unwrap();
        assert_eq!(unit.wait().await, UnitStatus::Signaled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_unit_reports_exit_code() {
        // `sh -c 'exit 3' run <name>`: extra args become positional parameters.
        let args = vec![OsString::from("-c"), OsString::from("exit 3")];
        let mut unit = ProcessUnit::spawn("job", Path::new("sh"), &args, &[]).unwrap();
        assert!(unit.pid().is_some());
        let status = tokio::time::timeout(Duration::from_secs(5), unit.wait())
            .await
            .unwrap();
        assert_eq!(status, UnitStatus::Exited(3));
        assert!(unit.kill().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_unit_applies_environment() {
        let args = vec![
            OsString::from("-c"),
            OsString::from(r#"test "$FLEET_PROBE" = yes && test -z "$HOME""#),
        ];
        let env = vec![
            (OsString::from("FLEET_PROBE"), Some(OsString::from("yes"))),
            (OsString::from("HOME"), None),
        ];
        let mut unit = ProcessUnit::spawn("job", Path::new("sh"), &args, &env).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), unit.wait())
            .await
            .unwrap();
        assert_eq!(status, UnitStatus::Exited(0));
    }
}
