//! # Telemetry runtime.
//!
//! A [`Runtime`] is the metrics substrate attached to a connection. It is built by
//! [`RuntimeBuilder`] and is distinct from the tokio runtime.
//!
//! ## Metrics exporter
//! When a bind address is configured the builder binds a listener and serves the
//! runtime's [`Metrics`] in Prometheus text format on `GET /metrics` (axum).
//!
//! ## Rendering flags
//! | Setting                 | Effect                                                   |
//! |-------------------------|----------------------------------------------------------|
//! | `counters_total_suffix` | counters are exposed as `<name>_total`                   |
//! | `unit_suffix`           | durations are exposed as `<name>_seconds` / `_milliseconds` |
//! | `durations_as_seconds`  | duration values are seconds instead of milliseconds      |
//!
//! ## Port conflict policy
//! ```text
//! bind(addr) ── Ok            ──► Runtime { exporter: Some(addr) }
//!            ── AddrInUse     ──► warn!, Runtime { exporter: None }
//!            ── other error   ──► BuildError::Telemetry
//! ```
//! A telemetry port taken by a sibling process never blocks the worker itself.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MetricsSettings;
use crate::error::BuildError;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone, Copy, Debug, Default)]
struct DurationStat {
    count: u64,
    sum: Duration,
}

/// Counter and duration registry rendered in Prometheus text format.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<String, u64>>,
    durations: Mutex<BTreeMap<String, DurationStat>>,
    prefix: Option<String>,
    total_suffix: bool,
    unit_suffix: bool,
    durations_as_seconds: bool,
    labels: Vec<(String, String)>,
}

impl Metrics {
    fn new(settings: &MetricsSettings, labels: Vec<(String, String)>) -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            durations: Mutex::new(BTreeMap::new()),
            prefix: settings.metric_prefix.clone(),
            total_suffix: settings.counters_total_suffix,
            unit_suffix: settings.unit_suffix,
            durations_as_seconds: settings.durations_as_seconds,
            labels,
        }
    }

    /// Adds `n` to the counter `name`, creating it at zero first if needed.
    pub fn incr(&self, name: &str, n: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(name.to_string()).or_insert(0) += n;
    }

    /// Current value of `name` (0 if never incremented).
    pub fn get(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).copied().unwrap_or(0)
    }

    /// Records one observation of the duration metric `name`.
    pub fn observe(&self, name: &str, elapsed: Duration) {
        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        let stat = durations.entry(name.to_string()).or_default();
        stat.count += 1;
        stat.sum += elapsed;
    }

    /// Number of observations recorded for `name`.
    pub fn observations(&self, name: &str) -> u64 {
        let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations.get(name).map_or(0, |s| s.count)
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}{name}"),
            None => name.to_string(),
        }
    }

    /// Renders every metric in Prometheus exposition format.
    pub fn render(&self) -> String {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            let inner: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
                .collect();
            format!("{{{}}}", inner.join(","))
        };

        let mut out = String::new();
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in counters.iter() {
            let mut full = self.full_name(name);
            if self.total_suffix {
                full.push_str("_total");
            }
            out.push_str(&format!("# TYPE {full} counter\n{full}{labels} {value}\n"));
        }
        drop(counters);

        let durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, stat) in durations.iter() {
            let mut full = self.full_name(name);
            if self.unit_suffix {
                full.push_str(if self.durations_as_seconds {
                    "_seconds"
                } else {
                    "_milliseconds"
                });
            }
            let nanos = stat.sum.as_nanos() as f64;
            let sum = if self.durations_as_seconds {
                nanos / 1e9
            } else {
                nanos / 1e6
            };
            out.push_str(&format!(
                "# TYPE {full} summary\n{full}_sum{labels} {sum}\n{full}_count{labels} {}\n",
                stat.count
            ));
        }
        out
    }
}

/// Builder for a [`Runtime`].
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    settings: MetricsSettings,
    global_tags: BTreeMap<String, String>,
    service_name: Option<String>,
    attach_service_name: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(MetricsSettings::default())
    }
}

impl RuntimeBuilder {
    /// Creates a builder from metrics settings.
    pub fn new(settings: MetricsSettings) -> Self {
        Self {
            settings,
            global_tags: BTreeMap::new(),
            service_name: None,
            attach_service_name: true,
        }
    }

    pub fn bind_address(mut self, addr: Option<String>) -> Self {
        self.settings.bind_address = addr;
        self
    }

    pub fn metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.metric_prefix = Some(prefix.into());
        self
    }

    pub fn global_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_tags.insert(key.into(), value.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Whether `service_name` is attached as a label to every metric.
    pub fn attach_service_name(mut self, attach: bool) -> Self {
        self.attach_service_name = attach;
        self
    }

    /// Builds the runtime, binding the metrics exporter if an address is configured.
    ///
    /// An address already in use degrades to a runtime without exporter.
    pub async fn build(self) -> Result<Runtime, BuildError> {
        let mut labels: Vec<(String, String)> = self.global_tags.into_iter().collect();
        if self.attach_service_name {
            if let Some(service) = &self.service_name {
                labels.push(("service_name".to_string(), service.clone()));
            }
        }
        let metrics = Arc::new(Metrics::new(&self.settings, labels));
        let stop = CancellationToken::new();

        let Some(addr) = self.settings.bind_address.as_deref() else {
            return Ok(Runtime::from_parts(metrics, None, stop));
        };

        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let local = listener.local_addr().map_err(|e| BuildError::Telemetry {
                    reason: e.to_string(),
                })?;
                info!(
                    pid = std::process::id(),
                    address = %local,
                    "metrics exporter bound"
                );
                let app = Router::new()
                    .route("/metrics", get(scrape))
                    .with_state(Arc::clone(&metrics));
                let shutdown = stop.clone().cancelled_owned();
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        error!(error = %e, "metrics exporter exited");
                    }
                });
                Ok(Runtime::from_parts(metrics, Some(local), stop))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!(
                    pid = std::process::id(),
                    address = addr,
                    "metrics port already in use; disabling metrics for this process"
                );
                Ok(Runtime::from_parts(metrics, None, stop))
            }
            Err(e) => Err(BuildError::Telemetry {
                reason: format!("bind {addr}: {e}"),
            }),
        }
    }
}

struct RuntimeInner {
    metrics: Arc<Metrics>,
    exporter: Option<SocketAddr>,
    stop: CancellationToken,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Telemetry runtime shared by a connection and the worker that owns it.
///
/// Cheap to clone; the exporter stops when the last clone is dropped.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    fn from_parts(metrics: Arc<Metrics>, exporter: Option<SocketAddr>, stop: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                metrics,
                exporter,
                stop,
            }),
        }
    }

    /// A runtime with an in-memory registry and no exporter.
    pub fn without_metrics() -> Self {
        Self::from_parts(Arc::new(Metrics::default()), None, CancellationToken::new())
    }

    /// Whether an exporter is serving this runtime's metrics.
    pub fn metrics_enabled(&self) -> bool {
        self.inner.exporter.is_some()
    }

    /// Address the exporter is bound to.
    pub fn metrics_address(&self) -> Option<SocketAddr> {
        self.inner.exporter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// True if both handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("exporter", &self.inner.exporter)
            .finish()
    }
}

async fn scrape(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], metrics.render())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn builds_without_exporter_when_unconfigured() {
        let rt = RuntimeBuilder::default().build().await.unwrap();
        assert!(!rt.metrics_enabled());
    }

    #[tokio::test]
    async fn occupied_port_degrades_instead_of_failing() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let rt = RuntimeBuilder::default()
            .bind_address(Some(addr))
            .build()
            .await
            .expect("port conflict must not fail the build");

        assert!(!rt.metrics_enabled());
        rt.metrics().incr("worker_runs", 1);
        assert_eq!(rt.metrics().get("worker_runs"), 1);
    }

    #[tokio::test]
    async fn invalid_address_is_a_telemetry_error() {
        let err = RuntimeBuilder::default()
            .bind_address(Some("not-an-address".into()))
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "build_telemetry");
    }

    #[tokio::test]
    async fn exporter_serves_prometheus_text() {
        let rt = RuntimeBuilder::new(MetricsSettings {
            counters_total_suffix: true,
            metric_prefix: Some("fleet_".into()),
            ..MetricsSettings::default()
        })
        .bind_address(Some("127.0.0.1:0".into()))
        .service_name("billing")
        .build()
        .await
        .unwrap();
        rt.metrics().incr("worker_runs", 2);

        let addr = rt.metrics_address().unwrap();
        let out = get_path(addr, "/metrics").await;
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.contains("text/plain; version=0.0.4"));
        assert!(out.contains("fleet_worker_runs_total{service_name=\"billing\"} 2"));

        let missing = get_path(addr, "/").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn exporter_stops_with_last_runtime_handle() {
        let rt = RuntimeBuilder::default()
            .bind_address(Some("127.0.0.1:0".into()))
            .build()
            .await
            .unwrap();
        let addr = rt.metrics_address().unwrap();
        drop(rt);

        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(listener) = TcpListener::bind(addr).await {
                rebound = Some(listener);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rebound.is_some(), "exporter still holds {addr}");
    }

    #[test]
    fn durations_render_in_milliseconds_by_default() {
        let metrics = Metrics::new(&MetricsSettings::default(), vec![]);
        metrics.observe("worker_build_duration", Duration::from_millis(1500));
        let out = metrics.render();
        assert!(out.contains("# TYPE worker_build_duration summary"));
        assert!(out.contains("worker_build_duration_sum 1500\n"));
        assert!(out.contains("worker_build_duration_count 1\n"));
    }

    #[test]
    fn seconds_flag_converts_duration_values() {
        let settings = MetricsSettings {
            durations_as_seconds: true,
            ..MetricsSettings::default()
        };
        let metrics = Metrics::new(&settings, vec![]);
        metrics.observe("worker_build_duration", Duration::from_millis(1500));
        metrics.observe("worker_build_duration", Duration::from_millis(500));
        let out = metrics.render();
        assert!(out.contains("worker_build_duration_sum 2\n"));
        assert!(out.contains("worker_build_duration_count 2\n"));
        assert_eq!(metrics.observations("worker_build_duration"), 2);
    }

    #[test]
    fn unit_suffix_names_the_duration_unit() {
        let millis = Metrics::new(
            &MetricsSettings {
                unit_suffix: true,
                ..MetricsSettings::default()
            },
            vec![],
        );
        millis.observe("drain", Duration::from_millis(20));
        assert!(millis.render().contains("drain_milliseconds_sum 20\n"));

        let secs = Metrics::new(
            &MetricsSettings {
                unit_suffix: true,
                durations_as_seconds: true,
                ..MetricsSettings::default()
            },
            vec![],
        );
        secs.observe("drain", Duration::from_secs(3));
        let out = secs.render();
        assert!(out.contains("# TYPE drain_seconds summary"));
        assert!(out.contains("drain_seconds_sum 3\n"));
    }

    #[test]
    fn counters_are_unaffected_by_unit_suffix() {
        let metrics = Metrics::new(
            &MetricsSettings {
                unit_suffix: true,
                ..MetricsSettings::default()
            },
            vec![],
        );
        metrics.incr("worker_runs", 1);
        assert!(metrics.render().contains("worker_runs 1\n"));
    }
}
