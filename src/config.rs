//! # Application configuration.
//!
//! Provides [`AppConfig`] centralized settings for connections, runnable units,
//! telemetry, supervision and logging.
//!
//! Config is used in three ways:
//! 1. **Application creation**: `Application::builder(name).config(cfg)`
//! 2. **Worker registration**: connection defaults and unit limits are copied into
//!    each durable worker's builders (and may be overridden per worker)
//! 3. **Supervision**: [`SupervisorConfig`] drives `run all`
//!
//! ## Environment
//! [`AppConfig::from_env`] reads `FLEETVISOR_*` variables. Malformed values fall
//! back to the defaults rather than failing startup.
//!
//! ## Sentinel values
//! - `metrics.bind_address = None` → no metrics exporter
//! - `supervisor.poll_interval` below 10 ms → clamped to 10 ms

use std::time::Duration;

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "FLEETVISOR_";

/// Global configuration for one application.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    /// Defaults applied to every durable worker's connection builder.
    pub connection: ConnectionDefaults,
    /// Defaults applied to every durable worker's unit builder.
    pub limits: UnitLimits,
    /// Telemetry runtime settings.
    pub metrics: MetricsSettings,
    /// `run all` supervision settings.
    pub supervisor: SupervisorConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which receives full variable names
    /// (including [`ENV_PREFIX`]).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = AppConfig::default();

        let connection = ConnectionDefaults {
            target_host: env
                .string("TARGET_HOST")
                .unwrap_or(defaults.connection.target_host),
            namespace: env
                .string("NAMESPACE")
                .unwrap_or(defaults.connection.namespace),
            api_key: env.string("API_KEY"),
            identity: env.string("IDENTITY"),
            tls: env.bool("TLS", defaults.connection.tls),
            structured_codec: env.bool("STRUCTURED_CODEC", defaults.connection.structured_codec),
        };

        let d = defaults.limits;
        let limits = UnitLimits {
            max_concurrent_workflow_tasks: env
                .parse("MAX_CONCURRENT_WORKFLOW_TASKS")
                .unwrap_or(d.max_concurrent_workflow_tasks),
            max_concurrent_activities: env
                .parse("MAX_CONCURRENT_ACTIVITIES")
                .unwrap_or(d.max_concurrent_activities),
            max_concurrent_local_activities: env
                .parse("MAX_CONCURRENT_LOCAL_ACTIVITIES")
                .unwrap_or(d.max_concurrent_local_activities),
            max_workflow_task_polls: env
                .parse("MAX_WORKFLOW_TASK_POLLS")
                .unwrap_or(d.max_workflow_task_polls),
            max_activity_task_polls: env
                .parse("MAX_ACTIVITY_TASK_POLLS")
                .unwrap_or(d.max_activity_task_polls),
            nonsticky_to_sticky_ratio: env
                .parse("NONSTICKY_TO_STICKY_RATIO")
                .unwrap_or(d.nonsticky_to_sticky_ratio),
            graceful_shutdown_timeout: env
                .parse("GRACEFUL_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(d.graceful_shutdown_timeout),
            debug_mode: env.bool("DEBUG_MODE", d.debug_mode),
        };

        let metrics = MetricsSettings {
            bind_address: env.string("PROMETHEUS_BIND_ADDRESS"),
            counters_total_suffix: env.bool("PROMETHEUS_COUNTERS_TOTAL_SUFFIX", false),
            unit_suffix: env.bool("PROMETHEUS_UNIT_SUFFIX", false),
            durations_as_seconds: env.bool("PROMETHEUS_DURATIONS_AS_SECONDS", false),
            metric_prefix: env.string("METRIC_PREFIX"),
        };

        let s = defaults.supervisor;
        let supervisor = SupervisorConfig {
            grace: env
                .parse("SUPERVISOR_GRACE")
                .map(Duration::from_secs)
                .unwrap_or(s.grace),
            poll_interval: env
                .parse("SUPERVISOR_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(s.poll_interval),
            fan_out: env
                .string("FAN_OUT")
                .and_then(|v| FanOut::parse(&v))
                .unwrap_or(s.fan_out),
            bus_capacity: s.bus_capacity,
        };

        let l = defaults.log;
        let log = LogConfig {
            level: env.string("LOG_LEVEL").unwrap_or(l.level),
            format: env
                .string("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(l.format),
            ansi: env.bool("LOG_ANSI", l.ansi),
        };

        Self {
            connection,
            limits,
            metrics,
            supervisor,
            log,
        }
    }
}

/// Connection settings shared by every durable worker unless overridden.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDefaults {
    /// `host:port` of the durable-execution frontend.
    pub target_host: String,
    /// Namespace all workers connect to.
    pub namespace: String,
    /// Optional API key credential.
    pub api_key: Option<String>,
    /// Optional client identity.
    pub identity: Option<String>,
    /// Whether to use TLS.
    pub tls: bool,
    /// Whether payloads use the structured (schema-aware) codec.
    pub structured_codec: bool,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            target_host: "localhost:7233".to_string(),
            namespace: "default".to_string(),
            api_key: None,
            identity: None,
            tls: false,
            structured_codec: false,
        }
    }
}

/// Concurrency and drain limits handed to the SDK when a unit is assembled.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitLimits {
    pub max_concurrent_workflow_tasks: usize,
    pub max_concurrent_activities: usize,
    pub max_concurrent_local_activities: usize,
    pub max_workflow_task_polls: usize,
    pub max_activity_task_polls: usize,
    pub nonsticky_to_sticky_ratio: f64,
    /// Upper bound for draining in-flight tasks on shutdown.
    pub graceful_shutdown_timeout: Duration,
    pub debug_mode: bool,
}

impl Default for UnitLimits {
    fn default() -> Self {
        Self {
            max_concurrent_workflow_tasks: 300,
            max_concurrent_activities: 300,
            max_concurrent_local_activities: 100,
            max_workflow_task_polls: 10,
            max_activity_task_polls: 10,
            nonsticky_to_sticky_ratio: 0.2,
            graceful_shutdown_timeout: Duration::from_secs(30),
            debug_mode: false,
        }
    }
}

/// Telemetry runtime settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSettings {
    /// Address of the Prometheus exporter (`None` = metrics disabled).
    pub bind_address: Option<String>,
    pub counters_total_suffix: bool,
    pub unit_suffix: bool,
    pub durations_as_seconds: bool,
    /// Optional prefix prepended to every metric name.
    pub metric_prefix: Option<String>,
}

/// How `run all` isolates workers from each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FanOut {
    /// Process-per-worker where the platform supports it, task-per-worker otherwise.
    #[default]
    Auto,
    /// One OS process per worker (re-executes the current binary).
    Process,
    /// One runtime task per worker inside the current process.
    Task,
}

impl FanOut {
    /// Parses `auto`, `process` or `task` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(FanOut::Auto),
            "process" => Some(FanOut::Process),
            "task" | "thread" => Some(FanOut::Task),
            _ => None,
        }
    }

    /// Resolves [`FanOut::Auto`] against the platform's capabilities.
    pub fn resolve(self) -> FanOut {
        match self {
            FanOut::Auto if cfg!(unix) => FanOut::Process,
            FanOut::Auto => FanOut::Task,
            other => other,
        }
    }
}

/// Supervision settings for `run all`.
///
/// ## Field semantics
/// - `grace`: Maximum wait for units to stop after an interrupt before they are killed
/// - `poll_interval`: Liveness polling period (min 10 ms)
/// - `fan_out`: Process or task isolation
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub grace: Duration,
    pub poll_interval: Duration,
    pub fan_out: FanOut,
    pub bus_capacity: usize,
}

impl SupervisorConfig {
    /// Returns the poll interval clamped to a minimum of 10 ms.
    #[inline]
    pub fn poll_interval_clamped(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(10))
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `poll_interval = 500ms`
    /// - `fan_out = Auto`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            fan_out: FanOut::Auto,
            bus_capacity: 1024,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    /// Parses `plain`/`text` or `json` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging settings. `RUST_LOG`, when set, takes precedence over `level`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            ansi: false,
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.string(key).and_then(|v| v.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = AppConfig::from_lookup(|_| None);
        assert_eq!(cfg.connection, ConnectionDefaults::default());
        assert_eq!(cfg.limits, UnitLimits::default());
        assert_eq!(cfg.supervisor, SupervisorConfig::default());
        assert!(cfg.metrics.bind_address.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("TARGET_HOST", "temporal:7233"),
            ("TLS", "yes"),
            ("MAX_CONCURRENT_ACTIVITIES", "12"),
            ("GRACEFUL_SHUTDOWN_TIMEOUT", "5"),
            ("PROMETHEUS_BIND_ADDRESS", "0.0.0.0:9000"),
            ("PROMETHEUS_UNIT_SUFFIX", "true"),
            ("PROMETHEUS_DURATIONS_AS_SECONDS", "1"),
            ("METRIC_PREFIX", "fleet_"),
            ("FAN_OUT", "task"),
            ("LOG_FORMAT", "json"),
        ]));
        assert_eq!(cfg.connection.target_host, "temporal:7233");
        assert!(cfg.connection.tls);
        assert_eq!(cfg.limits.max_concurrent_activities, 12);
        assert_eq!(cfg.limits.graceful_shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.metrics.bind_address.as_deref(), Some("0.0.0.0:9000"));
        assert!(cfg.metrics.unit_suffix);
        assert!(cfg.metrics.durations_as_seconds);
        assert!(!cfg.metrics.counters_total_suffix);
        assert_eq!(cfg.metrics.metric_prefix.as_deref(), Some("fleet_"));
        assert_eq!(cfg.supervisor.fan_out, FanOut::Task);
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("MAX_CONCURRENT_ACTIVITIES", "lots"),
            ("NONSTICKY_TO_STICKY_RATIO", "n/a"),
            ("FAN_OUT", "fork"),
        ]));
        assert_eq!(cfg.limits.max_concurrent_activities, 300);
        assert_eq!(cfg.limits.nonsticky_to_sticky_ratio, 0.2);
        assert_eq!(cfg.supervisor.fan_out, FanOut::Auto);
    }

    #[test]
    fn poll_interval_is_clamped() {
        let cfg = SupervisorConfig {
            poll_interval: Duration::ZERO,
            ..SupervisorConfig::default()
        };
        assert_eq!(cfg.poll_interval_clamped(), Duration::from_millis(10));
    }
}
