//! # In-memory collaborators for tests and demos.
//!
//! Scriptable fakes of the external contracts ([`Connector`], [`ExecutionClient`],
//! [`PollingUnit`], [`HttpServer`], [`BrokerApp`]). Each fake records what it was
//! asked to do so assertions can inspect it afterwards.
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetvisor::testing::FakeConnector;
//!
//! let ok = Arc::new(FakeConnector::new());
//! let down = Arc::new(FakeConnector::failing("connection refused"));
//! assert_eq!(ok.connects(), 0);
//! # let _ = down;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerApp, ConsumerOptions};
use crate::connection::ConnectionSettings;
use crate::error::SdkError;
use crate::runtime::Runtime;
use crate::sdk::{Connector, CronStart, ExecutionClient, PollingUnit, UnitDefinition};
use crate::servers::{Bind, HttpServer, WebApp};

fn snapshot<T: Clone>(m: &Mutex<Vec<T>>) -> Vec<T> {
    m.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<T>(m: &Mutex<Vec<T>>, v: T) {
    m.lock().unwrap_or_else(PoisonError::into_inner).push(v);
}

/// Connector that hands out one shared [`FakeClient`], or always fails.
pub struct FakeConnector {
    client: Arc<FakeClient>,
    failure: Option<String>,
    connects: AtomicUsize,
    settings_seen: Mutex<Vec<ConnectionSettings>>,
    runtimes_seen: Mutex<Vec<Runtime>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_client(FakeClient::new())
    }

    pub fn with_client(client: FakeClient) -> Self {
        Self {
            client: Arc::new(client),
            failure: None,
            connects: AtomicUsize::new(0),
            settings_seen: Mutex::new(Vec::new()),
            runtimes_seen: Mutex::new(Vec::new()),
        }
    }

    /// Every `connect` fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn client(&self) -> Arc<FakeClient> {
        Arc::clone(&self.client)
    }

    /// Number of `connect` calls, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn settings_seen(&self) -> Vec<ConnectionSettings> {
        snapshot(&self.settings_seen)
    }

    /// Telemetry runtimes handed to `connect`, in call order.
    pub fn runtimes_seen(&self) -> Vec<Runtime> {
        snapshot(&self.runtimes_seen)
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        runtime: &Runtime,
    ) -> Result<Arc<dyn ExecutionClient>, SdkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        push(&self.settings_seen, settings.clone());
        push(&self.runtimes_seen, runtime.clone());
        match &self.failure {
            Some(message) => Err(SdkError::new(message.clone())),
            None => Ok(Arc::clone(&self.client) as Arc<dyn ExecutionClient>),
        }
    }
}

/// Client recording unit definitions and cron start requests.
#[derive(Default)]
pub struct FakeClient {
    cron_failure: Option<String>,
    run_failure: Option<String>,
    units: Mutex<Vec<Arc<FakeUnit>>>,
    definitions: Mutex<Vec<UnitDefinition>>,
    cron_starts: Mutex<Vec<CronStart>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// `start_cron_workflow` fails with `message` (after recording the request).
    pub fn with_cron_failure(mut self, message: impl Into<String>) -> Self {
        self.cron_failure = Some(message.into());
        self
    }

    /// Units created by this client fail immediately when run.
    pub fn with_run_failure(mut self, message: impl Into<String>) -> Self {
        self.run_failure = Some(message.into());
        self
    }

    pub fn units(&self) -> Vec<Arc<FakeUnit>> {
        snapshot(&self.units)
    }

    pub fn definitions(&self) -> Vec<UnitDefinition> {
        snapshot(&self.definitions)
    }

    pub fn cron_starts(&self) -> Vec<CronStart> {
        snapshot(&self.cron_starts)
    }
}

#[async_trait]
impl ExecutionClient for FakeClient {
    fn create_unit(&self, definition: UnitDefinition) -> Result<Arc<dyn PollingUnit>, SdkError> {
        push(&self.definitions, definition);
        let unit = Arc::new(FakeUnit::new(self.run_failure.clone()));
        push(&self.units, Arc::clone(&unit));
        Ok(unit)
    }

    async fn start_cron_workflow(&self, request: CronStart) -> Result<(), SdkError> {
        push(&self.cron_starts, request);
        match &self.cron_failure {
            Some(message) => Err(SdkError::new(message.clone())),
            None => Ok(()),
        }
    }
}

/// Polling unit that idles until shut down.
pub struct FakeUnit {
    stop: CancellationToken,
    run_failure: Option<String>,
    runs: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl FakeUnit {
    fn new(run_failure: Option<String>) -> Self {
        Self {
            stop: CancellationToken::new(),
            run_failure,
            runs: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollingUnit for FakeUnit {
    async fn run(&self) -> Result<(), SdkError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.run_failure {
            return Err(SdkError::new(message.clone()));
        }
        self.stop.cancelled().await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SdkError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }
}

/// HTTP server adapter that serves nothing and "drains" for a fixed time.
pub struct FakeServer {
    name: String,
    drain: Duration,
    failure: Option<String>,
    binds: Mutex<Vec<Bind>>,
    drained: AtomicBool,
}

impl FakeServer {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            drain: Duration::ZERO,
            failure: None,
            binds: Mutex::new(Vec::new()),
            drained: AtomicBool::new(false),
        }
    }

    /// Time spent draining after the shutdown token fires.
    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }

    /// `serve` fails immediately with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn binds(&self) -> Vec<Bind> {
        snapshot(&self.binds)
    }

    /// Whether a drain completed.
    pub fn drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpServer for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn serve(
        &self,
        _app: WebApp,
        bind: Bind,
        shutdown: CancellationToken,
    ) -> Result<(), SdkError> {
        push(&self.binds, bind);
        if let Some(message) = &self.failure {
            return Err(SdkError::new(message.clone()));
        }
        shutdown.cancelled().await;
        tokio::time::sleep(self.drain).await;
        self.drained.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Broker application that consumes nothing until stopped.
pub struct FakeBroker {
    stop: CancellationToken,
    failure: Option<String>,
    stops: AtomicUsize,
    options_seen: Mutex<Vec<ConsumerOptions>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            failure: None,
            stops: AtomicUsize::new(0),
            options_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn options_seen(&self) -> Vec<ConsumerOptions> {
        snapshot(&self.options_seen)
    }
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerApp for FakeBroker {
    async fn run(&self, options: &ConsumerOptions) -> Result<(), SdkError> {
        push(&self.options_seen, options.clone());
        if let Some(message) = &self.failure {
            return Err(SdkError::new(message.clone()));
        }
        self.stop.cancelled().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SdkError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }
}
