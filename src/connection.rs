//! # Durable-execution client connections.
//!
//! [`ConnectionBuilder`] is the mutable half of a two-phase type: setters may be
//! called any number of times, and every [`ConnectionBuilder::build`] snapshots the
//! *current* field values into an immutable [`Connection`].
//!
//! ```text
//! set_target / set_namespace / set_credential / ...   (mutable, no I/O)
//!                 │
//!                 ▼
//! build() ── snapshot ConnectionSettings
//!         ── runtime: attached via set_runtime, else one lazily built default
//!         ── Connector::connect(settings, runtime)        (network handshake)
//!                 │
//!                 ▼
//!           Connection { settings, runtime, client }      (immutable)
//! ```
//!
//! The built connection never aliases builder state; mutating the builder after
//! `build()` only affects later builds.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::ConnectionDefaults;
use crate::error::BuildError;
use crate::runtime::{Runtime, RuntimeBuilder};
use crate::sdk::{Connector, ExecutionClient};

/// Snapshot of everything a connection was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub target: String,
    pub namespace: String,
    pub api_key: Option<String>,
    pub identity: Option<String>,
    pub tls: bool,
    pub structured_codec: bool,
}

impl From<&ConnectionDefaults> for ConnectionSettings {
    fn from(d: &ConnectionDefaults) -> Self {
        Self {
            target: d.target_host.clone(),
            namespace: d.namespace.clone(),
            api_key: d.api_key.clone(),
            identity: d.identity.clone(),
            tls: d.tls,
            structured_codec: d.structured_codec,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionDefaults::default())
    }
}

/// Mutable-until-built description of a client connection.
#[derive(Clone)]
pub struct ConnectionBuilder {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    runtime: Option<Runtime>,
    default_runtime: Option<Runtime>,
}

impl ConnectionBuilder {
    /// Creates a builder with default settings (`localhost:7233`, namespace `default`).
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            settings: ConnectionSettings::default(),
            runtime: None,
            default_runtime: None,
        }
    }

    pub fn set_target(&mut self, host: impl Into<String>) -> &mut Self {
        self.settings.target = host.into();
        self
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.settings.namespace = namespace.into();
        self
    }

    pub fn set_credential(&mut self, api_key: impl Into<String>) -> &mut Self {
        self.settings.api_key = Some(api_key.into());
        self
    }

    pub fn set_identity(&mut self, identity: impl Into<String>) -> &mut Self {
        self.settings.identity = Some(identity.into());
        self
    }

    pub fn set_tls(&mut self, tls: bool) -> &mut Self {
        self.settings.tls = tls;
        self
    }

    /// Switches payload encoding to the structured (schema-aware) codec.
    pub fn use_structured_codec(&mut self) -> &mut Self {
        self.settings.structured_codec = true;
        self
    }

    /// Attaches a previously built runtime; replaces any earlier one.
    pub fn set_runtime(&mut self, runtime: Runtime) -> &mut Self {
        self.runtime = Some(runtime);
        self
    }

    /// Applies application-wide defaults over the current settings.
    pub fn apply_defaults(&mut self, defaults: &ConnectionDefaults) -> &mut Self {
        self.settings = ConnectionSettings::from(defaults);
        self
    }

    /// Current (not yet built) settings.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connects with the current settings.
    ///
    /// If no runtime was attached, a metrics-less default runtime is built on the
    /// first call and reused by every later call on this builder.
    pub async fn build(&mut self) -> Result<Connection, BuildError> {
        let runtime = self.runtime_for_build().await?;
        let settings = self.settings.clone();

        debug!(
            target_host = %settings.target,
            namespace = %settings.namespace,
            tls = settings.tls,
            "connecting"
        );

        let client = self
            .connector
            .connect(&settings, &runtime)
            .await
            .map_err(|source| BuildError::Connection {
                target: settings.target.clone(),
                namespace: settings.namespace.clone(),
                source,
            })?;

        Ok(Connection {
            settings,
            runtime,
            client,
        })
    }

    async fn runtime_for_build(&mut self) -> Result<Runtime, BuildError> {
        if let Some(rt) = &self.runtime {
            return Ok(rt.clone());
        }
        if let Some(rt) = &self.default_runtime {
            return Ok(rt.clone());
        }
        let rt = RuntimeBuilder::default().build().await?;
        self.default_runtime = Some(rt.clone());
        Ok(rt)
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("settings", &self.settings)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// An established, immutable client connection.
#[derive(Clone)]
pub struct Connection {
    settings: ConnectionSettings,
    runtime: Runtime,
    client: Arc<dyn ExecutionClient>,
}

impl Connection {
    /// Settings this connection was built from.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn client(&self) -> &Arc<dyn ExecutionClient> {
        &self.client
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("settings", &self.settings)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
