//! # HTTP server adapters.
//!
//! Web-server workers do not implement HTTP. They hand an opaque [`WebApp`] to
//! one [`HttpServer`] adapter, picked from a [`ServerRegistry`].
//!
//! The registry is capability keyed: an adapter that is not compiled in (or not
//! available on this host) is simply never registered, and [`ServerChoice::Auto`]
//! picks the first available key in [`DEFAULT_PREFERENCE`] order.
//!
//! ```text
//! ServerRegistry { "hyper" → factory, "actix" → factory }
//!        │
//!        ├─ resolve(Auto)           ──► first of preference ∩ registered
//!        ├─ resolve(Named("actix")) ──► that factory
//!        └─ nothing registered      ──► RegistrationError::ServerUnavailable
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{RegistrationError, SdkError};

/// Fixed preference order used by [`ServerChoice::Auto`].
pub const DEFAULT_PREFERENCE: &[&str] = &["hyper", "axum", "actix"];

/// Type-erased application handed to a server adapter.
#[derive(Clone)]
pub struct WebApp {
    inner: Arc<dyn Any + Send + Sync>,
}

impl WebApp {
    pub fn new<T: Any + Send + Sync>(app: T) -> Self {
        Self {
            inner: Arc::new(app),
        }
    }

    /// Returns the application if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for WebApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebApp(..)")
    }
}

/// Where a server listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bind {
    pub host: String,
    pub port: u16,
}

impl Bind {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Bind {
    fn default() -> Self {
        Self::new("0.0.0.0", 8000)
    }
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Uniform "serve this app on host:port" contract.
#[async_trait]
pub trait HttpServer: Send + Sync + 'static {
    /// Adapter key, e.g. `"hyper"`.
    fn name(&self) -> &str;

    /// Serves `app` until `shutdown` is cancelled, then drains in-flight requests
    /// and returns.
    async fn serve(&self, app: WebApp, bind: Bind, shutdown: CancellationToken)
    -> Result<(), SdkError>;
}

/// Produces a fresh adapter instance for one worker.
pub type ServerFactory = Arc<dyn Fn() -> Arc<dyn HttpServer> + Send + Sync>;

/// Which adapter a web-server worker should use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ServerChoice {
    /// First available adapter in preference order.
    #[default]
    Auto,
    /// A specific adapter key.
    Named(String),
}

impl ServerChoice {
    fn label(&self) -> &str {
        match self {
            ServerChoice::Auto => "auto",
            ServerChoice::Named(key) => key,
        }
    }
}

/// Capability-keyed registry of server adapters.
#[derive(Clone)]
pub struct ServerRegistry {
    factories: HashMap<String, ServerFactory>,
    order: Vec<String>,
    preference: Vec<String>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
            order: Vec::new(),
            preference: DEFAULT_PREFERENCE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the preference order used by [`ServerChoice::Auto`].
    pub fn with_preference<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preference = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Registers (or replaces) the factory for `key`.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn HttpServer> + Send + Sync + 'static,
    {
        let key = key.into();
        if !self.factories.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.factories.insert(key, Arc::new(factory));
        self
    }

    pub fn is_available(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys in registration order.
    pub fn available(&self) -> &[String] {
        &self.order
    }

    /// Instantiates the adapter for `choice`.
    pub fn resolve(&self, choice: &ServerChoice) -> Result<Arc<dyn HttpServer>, RegistrationError> {
        let key = match choice {
            ServerChoice::Named(key) => self.factories.get_key_value(key).map(|(k, _)| k),
            ServerChoice::Auto => self
                .preference
                .iter()
                .find(|k| self.factories.contains_key(*k))
                .or_else(|| self.order.first()),
        };

        key.and_then(|k| self.factories.get(k))
            .map(|factory| factory())
            .ok_or_else(|| RegistrationError::ServerUnavailable {
                requested: choice.label().to_string(),
            })
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("available", &self.order)
            .field("preference", &self.preference)
            .finish()
    }
}
