//! # fleetvisor
//!
//! **Fleetvisor** registers heterogeneous workers (durable-execution task
//! queues, cron schedulers, web servers, message consumers, one-off commands)
//! under one command-line-driven [`Application`] and supervises their concurrent
//! execution.
//!
//! Restart policy is deliberately absent: a failed worker ends its run-unit and
//! the outer orchestrator (systemd, a container runtime, an operator) decides
//! what happens next.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Application::add_worker / add_web_worker / add_consumer_worker / add_exec / add_custom
//!                                   │
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │  WorkerRegistry  │  unique names, reserved names,
//!                          │ (ordered, Arc)   │  never overwritten
//!                          └────────┬─────────┘
//!                                   │ run all
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - one RunUnit per worker (TaskUnit or ProcessUnit)               │
//! │  - liveness polling, interrupt → shutdown → grace → kill          │
//! │  - Bus (broadcast events) → SubscriberSet → LogWriter, ...        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   DurableWorker     WebServerWorker     ConsumerWorker   ...
//!   (connection +     (HttpServer         (BrokerApp
//!    runtime + unit)   adapter)            run loop)
//! ```
//!
//! ### Durable worker build chain
//! ```text
//! RuntimeBuilder::build()     metrics exporter; port in use → metrics disabled
//!        │
//! ConnectionBuilder::build()  Connector::connect(settings, runtime)
//!        │
//! UnitBuilder::build()        ExecutionClient::create_unit(definition)
//!        │
//! PollingUnit::run()          until ctx is cancelled or shutdown() is called
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Application**   | Registration and command dispatch.                       | [`Application`], [`Command`], [`DurableSpec`] |
//! | **Workers**       | Variants sharing one lifecycle contract.                 | [`Worker`], [`WorkerKind`], [`WorkerState`]  |
//! | **Builders**      | Lazy, per-worker client/runtime/unit construction.       | [`ConnectionBuilder`], [`RuntimeBuilder`], [`UnitBuilder`] |
//! | **Supervision**   | Concurrent run-units and graceful shutdown.              | [`Supervisor`], [`RunUnit`], [`RunReport`]   |
//! | **Subscriber API**| Hook into supervision events.                            | [`Subscribe`], [`LogWriter`]                 |
//! | **Errors**        | Typed errors per phase.                                  | [`RegistrationError`], [`BuildError`], [`WorkerError`], [`RuntimeError`] |
//! | **Configuration** | Environment-driven settings.                             | [`AppConfig`], [`SupervisorConfig`]          |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use fleetvisor::testing::FakeConnector;
//! use fleetvisor::{ActivityRef, AppConfig, Application, Command, DurableSpec, FanOut, Telemetry};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = AppConfig::default();
//!     config.supervisor.fan_out = FanOut::Task;
//!
//!     let mut app = Application::builder("billing")
//!         .config(config)
//!         .connector(Arc::new(FakeConnector::new()))
//!         .telemetry(Telemetry::disabled())
//!         .build();
//!
//!     app.add_worker(
//!         "invoices",
//!         "invoices-queue",
//!         DurableSpec::activities(vec![ActivityRef::named("send_invoice")]),
//!     )?;
//!
//!     let stop = async {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         Ok(())
//!     };
//!     let code = app.run_until(Command::RunAll, stop).await?;
//!     assert_eq!(code, 0);
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod broker;
pub mod cli;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod events;
pub mod metrics_dir;
pub mod runtime;
pub mod sdk;
pub mod servers;
pub mod subscribers;
pub mod telemetry;
pub mod testing;
pub mod unit;
pub mod workers;

// ---- Public re-exports ----

pub use app::{Application, ApplicationBuilder, Command, DurableSpec, WorkerSpec};
pub use broker::{BrokerApp, ConsumerOptions};
pub use cli::{Cli, CliCommand};
pub use config::{AppConfig, FanOut, LogConfig, LogFormat, MetricsSettings, SupervisorConfig, UnitLimits};
pub use connection::{Connection, ConnectionBuilder, ConnectionSettings};
pub use crate::core::{RunReport, RunUnit, Supervisor, UnitOutcome, UnitStatus, WorkerRegistry};
pub use error::{BuildError, RegistrationError, RuntimeError, SdkError, WorkerError};
pub use events::{Event, EventKind};
pub use runtime::{Runtime, RuntimeBuilder};
pub use sdk::{ActivityRef, Connector, ExecutionClient, InterceptorRef, PollingUnit, WorkflowRef};
pub use servers::{Bind, HttpServer, ServerChoice, ServerRegistry, WebApp};
pub use subscribers::{LogWriter, Subscribe};
pub use telemetry::Telemetry;
pub use unit::UnitBuilder;
pub use workers::{Worker, WorkerKind, WorkerState};
