//! # Supervisor: runs every worker concurrently and coordinates shutdown.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`] and the supervision
//! settings. `run_all` launches one run-unit per worker, polls them until none is
//! alive, and turns an interrupt into a bounded, per-unit shutdown.
//!
//! ## High-level architecture
//! ```text
//! run_all(workers)
//!   │
//!   ├─ launch, in registration order:
//!   │     FanOut::Task    → TaskUnit::spawn(worker, root.child_token())
//!   │     FanOut::Process → ProcessUnit::spawn("<exe> run <name>")
//!   │
//!   ├─ loop every poll_interval:
//!   │     reap exited units ──► Bus.publish(UnitExited{code})
//!   │     none alive        ──► Ok(RunReport)
//!   │
//!   └─ interrupt observed:
//!         Bus.publish(ShutdownRequested)
//!         unit.request_shutdown()           for every live unit
//!         wait up to cfg.grace:
//!            ├─ all exited  → Bus.publish(AllStoppedWithin)
//!            └─ timeout     → Bus.publish(GraceExceeded)
//!                             unit.kill()   per remaining unit (warn! each)
//!
//! Event flow:
//!   Supervisor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit(&Event)
//! ```
//!
//! A supervisor performs one run. Before a run method returns, the bus is closed,
//! the listener forwards what is still buffered, and every subscriber has handled
//! its queue.
//!
//! One worker failing never fails `run_all`; its exit code is logged and kept in
//! the [`RunReport`]. Only the interrupt path itself (signal listeners, kill) can
//! return an error.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{FanOut, SupervisorConfig};
use crate::core::shutdown;
use crate::core::unit::{ProcessUnit, RunUnit, TaskUnit, UnitStatus};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::telemetry::Telemetry;
use crate::workers::Worker;

/// Exit code recorded for a unit that could not be launched.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Upper bound on waiting for a killed unit to be reaped.
const REAP_AFTER_KILL: Duration = Duration::from_secs(5);

/// Final state of one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitOutcome {
    pub name: String,
    pub status: UnitStatus,
    /// Killed after the grace period.
    pub forced: bool,
}

/// What happened during one `run_all`.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Outcomes in launch (registration) order.
    pub outcomes: Vec<UnitOutcome>,
    /// Whether an interrupt ended the run.
    pub interrupted: bool,
}

impl RunReport {
    pub fn get(&self, name: &str) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Units that did not exit with code 0.
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != UnitStatus::Exited(0))
    }

    /// Highest non-zero exit code among the units; a signal counts as 1.
    pub fn worst_exit_code(&self) -> i32 {
        self.failures()
            .map(|o| o.status.exit_code().unwrap_or(1))
            .max()
            .unwrap_or(0)
    }
}

fn spawn_error(unit: &str, e: &std::io::Error) -> RuntimeError {
    RuntimeError::Spawn {
        unit: unit.to_string(),
        source: std::io::Error::new(e.kind(), e.to_string()),
    }
}

struct Slot {
    unit: Option<Box<dyn RunUnit>>,
    name: String,
    outcome: Option<UnitOutcome>,
}

/// Coordinates run-units, event delivery and graceful shutdown.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    listener: JoinHandle<()>,
    telemetry: Telemetry,
    program: Option<(PathBuf, Vec<OsString>)>,
    child_env: Vec<(OsString, Option<OsString>)>,
}

impl Supervisor {
    /// Creates a supervisor and starts forwarding bus events to `subscribers`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        cfg: SupervisorConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
        telemetry: Telemetry,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(subscribers, bus.downgrade(), &telemetry);
        let listener = subscriber_listener(&bus, subs, &telemetry);
        Self {
            cfg,
            bus,
            listener,
            telemetry,
            program: None,
            child_env: Vec::new(),
        }
    }

    /// Program (and leading arguments) used for process fan-out.
    ///
    /// Defaults to the current executable with no extra arguments.
    pub fn with_program(mut self, program: PathBuf, args: Vec<OsString>) -> Self {
        self.program = Some((program, args));
        self
    }

    /// Sets (`Some`) or removes (`None`) an environment variable in every child process.
    pub fn with_child_env(mut self, key: impl Into<OsString>, value: Option<OsString>) -> Self {
        self.child_env.push((key.into(), value));
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Runs every worker until all exit or an OS termination signal arrives.
    pub async fn run_all(self, workers: Vec<Arc<dyn Worker>>) -> Result<RunReport, RuntimeError> {
        self.run_all_until(workers, shutdown::wait_for_shutdown_signal())
            .await
    }

    /// Like [`Supervisor::run_all`], with `interrupt` in place of OS signals.
    pub async fn run_all_until<F>(
        self,
        workers: Vec<Arc<dyn Worker>>,
        interrupt: F,
    ) -> Result<RunReport, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let report = if workers.is_empty() {
            warn!("no workers to supervise");
            Ok(RunReport::default())
        } else {
            let root = CancellationToken::new();
            let slots = self.launch(workers, &root);
            let report = self.supervise(slots, interrupt).await;
            root.cancel();
            report
        };
        self.close().await;
        report
    }

    /// Runs `count` child processes, each executing `run <name>`, until all exit
    /// or an OS termination signal arrives.
    pub async fn run_replicas(self, name: &str, count: usize) -> Result<RunReport, RuntimeError> {
        self.run_replicas_until(name, count, shutdown::wait_for_shutdown_signal())
            .await
    }

    /// Like [`Supervisor::run_replicas`], with `interrupt` in place of OS signals.
    ///
    /// Replicas are reported as `<name>#<index>`.
    pub async fn run_replicas_until<F>(
        self,
        name: &str,
        count: usize,
        interrupt: F,
    ) -> Result<RunReport, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let program = self.program_for_fan_out();
        info!(worker = name, replicas = count, "launching replicas");
        let slots = (0..count)
            .map(|i| {
                let label = format!("{name}#{i}");
                let launched = match &program {
                    Ok((exe, args)) => ProcessUnit::spawn(name, exe, args, &self.child_env)
                        .map(|u| Box::new(u) as Box<dyn RunUnit>),
                    Err(e) => Err(spawn_error(name, e)),
                };
                self.slot(label, launched)
            })
            .collect();
        let report = self.supervise(slots, interrupt).await;
        self.close().await;
        report
    }

    /// Closes the bus and waits until every subscriber has handled what was published.
    async fn close(self) {
        let Supervisor { bus, listener, .. } = self;
        drop(bus);
        if let Err(e) = listener.await {
            warn!(error = %e, "event listener failed");
        }
    }

    async fn supervise<F>(&self, mut slots: Vec<Slot>, interrupt: F) -> Result<RunReport, RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval_clamped());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(interrupt);

        loop {
            if self.reap(&mut slots) == 0 {
                return Ok(Self::report(slots, false));
            }
            tokio::select! {
                signal = &mut interrupt => {
                    signal.map_err(RuntimeError::Signal)?;
                    self.shutdown_all(&mut slots).await?;
                    return Ok(Self::report(slots, true));
                }
                _ = ticker.tick() => {}
            }
        }
    }

    fn launch(&self, workers: Vec<Arc<dyn Worker>>, root: &CancellationToken) -> Vec<Slot> {
        let fan_out = self.cfg.fan_out.resolve();
        let program = match fan_out {
            FanOut::Process => Some(self.program_for_fan_out()),
            _ => None,
        };
        info!(units = workers.len(), fan_out = ?fan_out, "launching workers");

        workers
            .into_iter()
            .map(|worker| {
                let name = worker.name().to_string();
                let launched: Result<Box<dyn RunUnit>, RuntimeError> = match &program {
                    Some(Ok((exe, args))) => ProcessUnit::spawn(&name, exe, args, &self.child_env)
                        .map(|u| Box::new(u) as Box<dyn RunUnit>),
                    Some(Err(e)) => Err(spawn_error(&name, e)),
                    None => {
                        let unit = TaskUnit::spawn(worker, root.child_token(), &self.telemetry);
                        Ok(Box::new(unit) as Box<dyn RunUnit>)
                    }
                };
                self.slot(name, launched)
            })
            .collect()
    }

    fn slot(&self, name: String, launched: Result<Box<dyn RunUnit>, RuntimeError>) -> Slot {
        match launched {
            Ok(unit) => {
                self.bus.publish(
                    Event::new(EventKind::UnitStarted)
                        .with_unit(name.as_str())
                        .with_pid(unit.pid()),
                );
                Slot {
                    unit: Some(unit),
                    name,
                    outcome: None,
                }
            }
            Err(e) => {
                error!(unit = %name, error = %e, "cannot launch worker");
                self.bus.publish(
                    Event::new(EventKind::UnitExited)
                        .with_unit(name.as_str())
                        .with_exit_code(SPAWN_FAILURE_EXIT_CODE)
                        .with_reason(e.to_string()),
                );
                Slot {
                    unit: None,
                    outcome: Some(UnitOutcome {
                        name: name.clone(),
                        status: UnitStatus::Exited(SPAWN_FAILURE_EXIT_CODE),
                        forced: false,
                    }),
                    name,
                }
            }
        }
    }

    fn program_for_fan_out(&self) -> std::io::Result<(PathBuf, Vec<OsString>)> {
        match &self.program {
            Some(p) => Ok(p.clone()),
            None => Ok((std::env::current_exe()?, Vec::new())),
        }
    }

    /// Records newly exited units; returns how many are still alive.
    fn reap(&self, slots: &mut [Slot]) -> usize {
        let mut alive = 0;
        for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
            let Some(unit) = slot.unit.as_mut() else {
                continue;
            };
            let status = unit.status();
            if status.is_alive() {
                alive += 1;
                continue;
            }
            self.record_exit(slot, status, false);
        }
        alive
    }

    fn record_exit(&self, slot: &mut Slot, status: UnitStatus, forced: bool) {
        let mut ev = Event::new(EventKind::UnitExited).with_unit(slot.name.as_str());
        match status.exit_code() {
            Some(code) => ev = ev.with_exit_code(code),
            None => ev = ev.with_reason("signal"),
        }
        self.bus.publish(ev);
        slot.outcome = Some(UnitOutcome {
            name: slot.name.clone(),
            status,
            forced,
        });
    }

    /// Broadcasts shutdown, waits up to `grace`, then kills whatever is left.
    async fn shutdown_all(&self, slots: &mut [Slot]) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_grace(grace));

        for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
            if let Some(unit) = slot.unit.as_mut() {
                if let Err(e) = unit.request_shutdown() {
                    warn!(unit = %slot.name, error = %e, "shutdown request failed");
                }
            }
        }

        let deadline = Instant::now() + grace;
        let poll = self.cfg.poll_interval_clamped();
        loop {
            if self.reap(slots) == 0 {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep_until((now + poll).min(deadline)).await;
        }

        let stuck: Vec<&str> = slots
            .iter()
            .filter(|s| s.outcome.is_none())
            .map(|s| s.name.as_str())
            .collect();
        self.bus.publish(
            Event::new(EventKind::GraceExceeded)
                .with_reason(stuck.join(","))
                .with_grace(grace),
        );

        for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
            let Some(unit) = slot.unit.as_mut() else {
                continue;
            };
            warn!(unit = %slot.name, grace = ?grace, "unit did not stop within grace period; killing");
            self.bus.publish(
                Event::new(EventKind::UnitKilled)
                    .with_unit(slot.name.as_str())
                    .with_grace(grace),
            );
            unit.kill()?;
            let status = tokio::time::timeout(REAP_AFTER_KILL, unit.wait())
                .await
                .unwrap_or(UnitStatus::Signaled);
            self.record_exit(slot, status, true);
        }
        Ok(())
    }

    fn report(slots: Vec<Slot>, interrupted: bool) -> RunReport {
        let outcomes = slots
            .into_iter()
            .map(|s| {
                s.outcome.unwrap_or(UnitOutcome {
                    name: s.name,
                    status: UnitStatus::Signaled,
                    forced: false,
                })
            })
            .collect();
        RunReport {
            outcomes,
            interrupted,
        }
    }
}

/// Forwards bus events to `set` until the bus closes, then drains the set.
fn subscriber_listener(bus: &Bus, set: SubscriberSet, telemetry: &Telemetry) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(telemetry.instrument(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::watch;

    use super::*;
    use crate::error::WorkerError;
    use crate::workers::{WorkerKind, WorkerState};

    /// Worker that ignores cancellation entirely.
    struct Stubborn;

    #[async_trait]
    impl Worker for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn kind(&self) -> WorkerKind {
            WorkerKind::Custom
        }
        async fn run(&self, _ctx: CancellationToken) -> Result<(), WorkerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), WorkerError> {
            Ok(())
        }
        fn state(&self) -> WorkerState {
            WorkerState::Active
        }
        fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
            watch::channel(WorkerState::Active).1
        }
    }

    #[derive(Default)]
    struct Kinds(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
    }

    fn cfg() -> SupervisorConfig {
        SupervisorConfig {
            grace: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            fan_out: FanOut::Task,
            ..SupervisorConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_fleet_returns_immediately() {
        let sup = Supervisor::new(cfg(), vec![], Telemetry::disabled());
        let report = sup
            .run_all_until(vec![], std::future::pending())
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn stuck_unit_is_killed_after_grace() {
        let kinds = Arc::new(Kinds::default());
        let sup = Supervisor::new(
            cfg(),
            vec![kinds.clone() as Arc<dyn Subscribe>],
            Telemetry::disabled(),
        );

        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        };
        let report = sup
            .run_all_until(vec![Arc::new(Stubborn)], interrupt)
            .await
            .unwrap();

        assert!(report.interrupted);
        let outcome = report.get("stubborn").unwrap();
        assert!(outcome.forced);
        assert_eq!(outcome.status, UnitStatus::Signaled);

        let seen = kinds.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                EventKind::UnitStarted,
                EventKind::ShutdownRequested,
                EventKind::GraceExceeded,
                EventKind::UnitKilled,
                EventKind::UnitExited,
            ]
        );
    }

    #[tokio::test]
    async fn subscribers_are_released_when_the_run_returns() {
        let kinds = Arc::new(Kinds::default());
        let sup = Supervisor::new(
            cfg(),
            vec![kinds.clone() as Arc<dyn Subscribe>],
            Telemetry::disabled(),
        );
        let report = sup
            .run_all_until(vec![], std::future::pending())
            .await
            .unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(Arc::strong_count(&kinds), 1);
    }

    #[tokio::test]
    async fn dropping_an_unused_supervisor_stops_its_listener() {
        let kinds = Arc::new(Kinds::default());
        let sup = Supervisor::new(
            cfg(),
            vec![kinds.clone() as Arc<dyn Subscribe>],
            Telemetry::disabled(),
        );
        drop(sup);

        for _ in 0..100 {
            if Arc::strong_count(&kinds) == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("subscriber still held after the supervisor was dropped");
    }

    #[tokio::test]
    async fn signal_listener_failure_is_an_error() {
        let sup = Supervisor::new(cfg(), vec![], Telemetry::disabled());
        let interrupt = async { Err(std::io::Error::other("no signal handlers")) };
        let err = sup
            .run_all_until(vec![Arc::new(Stubborn)], interrupt)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_signal");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replicas_report_worst_exit_code() {
        let sup = Supervisor::new(cfg(), vec![], Telemetry::disabled()).with_program(
            PathBuf::from("sh"),
            vec![OsString::from("-c"), OsString::from("exit 4")],
        );
        let report = sup
            .run_replicas_until("job", 3, std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.get("job#2").unwrap().status, UnitStatus::Exited(4));
        assert_eq!(report.worst_exit_code(), 4);
        assert!(!report.interrupted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_units_stop_on_terminate_within_grace() {
        let sup = Supervisor::new(
            SupervisorConfig {
                grace: Duration::from_secs(5),
                fan_out: FanOut::Process,
                ..cfg()
            },
            vec![],
            Telemetry::disabled(),
        )
        .with_program(
            PathBuf::from("sh"),
            vec![OsString::from("-c"), OsString::from("sleep 30")],
        );

        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        };
        let report = sup
            .run_all_until(vec![Arc::new(Stubborn)], interrupt)
            .await
            .unwrap();

        let outcome = report.get("stubborn").unwrap();
        assert!(!outcome.forced);
        assert_eq!(outcome.status, UnitStatus::Signaled);
    }
}
