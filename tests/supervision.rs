use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetvisor::testing::FakeConnector;
use fleetvisor::workers::{DurableWorker, Termination, wait_until_active};
use fleetvisor::{
    ActivityRef, AppConfig, Application, Command, ConnectionBuilder, DurableSpec, Event,
    EventKind, FanOut, RuntimeBuilder, Subscribe, Supervisor, SupervisorConfig, Telemetry,
    UnitBuilder, UnitStatus, Worker, WorkerState,
};

#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, ev: &Event) {
        self.0.lock().unwrap().push(ev.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        grace: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        fan_out: FanOut::Task,
        ..SupervisorConfig::default()
    }
}

/// Three durable workers; the second cannot connect.
fn fleet() -> (Application, Vec<Arc<DurableWorker>>) {
    let config = AppConfig {
        supervisor: supervisor_config(),
        ..AppConfig::default()
    };
    let mut app = Application::builder("fleet")
        .config(config)
        .connector(Arc::new(FakeConnector::new()))
        .telemetry(Telemetry::disabled())
        .subscribers(vec![])
        .build();

    let first = app
        .add_worker(
            "worker_1",
            "q1",
            DurableSpec::activities(vec![ActivityRef::named("act_a")]),
        )
        .unwrap();

    let mut unit = UnitBuilder::new("q2");
    unit.set_activities(vec![ActivityRef::named("act_b")]);
    let broken = DurableWorker::new(
        "worker_2",
        ConnectionBuilder::new(Arc::new(FakeConnector::failing("connection refused"))),
        RuntimeBuilder::default(),
        unit,
        None,
    );
    let second = app.add_custom(broken).unwrap();

    let third = app
        .add_worker(
            "worker_3",
            "q3",
            DurableSpec::activities(vec![ActivityRef::named("act_c")]),
        )
        .unwrap();

    (app, vec![first, second, third])
}

/// Completes once workers #1 and #3 are active and #2 has terminated.
async fn fleet_settled(workers: &[Arc<DurableWorker>]) -> std::io::Result<()> {
    assert_eq!(wait_until_active(workers[0].as_ref()).await, WorkerState::Active);
    assert_eq!(wait_until_active(workers[2].as_ref()).await, WorkerState::Active);
    let mut failed = workers[1].subscribe_state();
    let _ = failed.wait_for(WorkerState::is_terminated).await;
    Ok(())
}

#[tokio::test]
async fn one_failed_connection_does_not_stop_the_fleet() {
    let (app, workers) = fleet();
    let recorder = Arc::new(Recorder::default());
    let supervisor = Supervisor::new(
        supervisor_config(),
        vec![recorder.clone() as Arc<dyn Subscribe>],
        Telemetry::disabled(),
    );

    let report = supervisor
        .run_all_until(app.registry().supervised(), fleet_settled(&workers))
        .await
        .unwrap();

    assert!(report.interrupted);
    let names: Vec<_> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["worker_1", "worker_2", "worker_3"]);

    assert_eq!(report.get("worker_2").unwrap().status, UnitStatus::Exited(2));
    for name in ["worker_1", "worker_3"] {
        let outcome = report.get(name).unwrap();
        assert_eq!(outcome.status, UnitStatus::Exited(0));
        assert!(!outcome.forced);
    }

    assert_eq!(workers[0].state(), WorkerState::Terminated(Termination::Signal));
    assert_eq!(workers[1].state(), WorkerState::Terminated(Termination::Error));
    assert_eq!(workers[2].state(), WorkerState::Terminated(Termination::Signal));

    // Every published event has been handled by the time the run returns.
    assert_eq!(Arc::strong_count(&recorder), 1);
    let events = recorder.0.lock().unwrap().clone();
    let exit_of = |unit: &str| {
        events
            .iter()
            .find(|e| e.kind == EventKind::UnitExited && e.unit.as_deref() == Some(unit))
            .and_then(|e| e.exit_code)
    };
    assert_eq!(exit_of("worker_2"), Some(2));
    assert_eq!(exit_of("worker_1"), Some(0));
    assert!(events.iter().any(|e| e.kind == EventKind::ShutdownRequested));
    assert!(events.iter().any(|e| e.kind == EventKind::AllStoppedWithin));
    assert!(!events.iter().any(|e| e.kind == EventKind::UnitKilled));
}

#[tokio::test]
async fn run_all_exit_code_ignores_worker_failures() {
    let (app, workers) = fleet();
    let code = app
        .run_until(Command::RunAll, fleet_settled(&workers))
        .await
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn shutdown_after_run_reports_not_running() {
    let (app, workers) = fleet();
    app.run_until(Command::RunAll, fleet_settled(&workers))
        .await
        .unwrap();

    for worker in &workers {
        let err = tokio::time::timeout(Duration::from_secs(1), worker.shutdown())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.as_label(), "worker_not_running");
    }
}
