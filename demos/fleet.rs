//! Demo fleet built on the in-memory collaborators from `fleetvisor::testing`.
//!
//! ```text
//! cargo run --example fleet -- run all
//! cargo run --example fleet -- run invoices --workers 3
//! cargo run --example fleet -- cron nightly-report
//! cargo run --example fleet -- exec migrate
//! ```
//!
//! Stop with Ctrl-C; every worker drains and exits with status 0.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use fleetvisor::testing::{FakeBroker, FakeConnector, FakeServer};
use fleetvisor::workers::ExecFn;
use fleetvisor::{
    ActivityRef, Application, Bind, ConsumerOptions, DurableSpec, HttpServer, ServerChoice,
    ServerRegistry, WebApp, WorkflowRef,
};

fn build() -> Result<Application, Box<dyn Error>> {
    let mut servers = ServerRegistry::new();
    servers.register("hyper", || Arc::new(FakeServer::named("hyper")) as Arc<dyn HttpServer>);

    let mut app = Application::builder("fleet-demo")
        .connector(Arc::new(FakeConnector::new()))
        .servers(servers)
        .build();

    app.add_worker(
        "invoices",
        "invoices",
        DurableSpec::activities(vec![
            ActivityRef::named("render_invoice"),
            ActivityRef::named("send_invoice"),
        ]),
    )?;

    let report = WorkflowRef::named("NightlyReport");
    app.add_worker(
        "nightly-report",
        "reports",
        DurableSpec::workflows(vec![report.clone()]).with_cron("0 0 * * *", report),
    )?;

    app.add_web_worker(
        "api",
        WebApp::new("fleet-demo api"),
        Bind::new("127.0.0.1", 8000),
        ServerChoice::Auto,
    )?;

    app.add_consumer_worker(
        "events",
        Arc::new(FakeBroker::new()),
        ConsumerOptions::default().with("queue", "events"),
    )?;

    let migrate: ExecFn = Arc::new(|| {
        println!("schema is up to date");
        Ok(())
    });
    app.add_exec("migrate", migrate)?;

    Ok(app)
}

#[tokio::main]
async fn main() -> ExitCode {
    match build() {
        Ok(app) => app.run_cli().await,
        Err(e) => {
            eprintln!("cannot register workers: {e}");
            ExitCode::FAILURE
        }
    }
}
