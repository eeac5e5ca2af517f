//! # Log pipeline handed to every component.
//!
//! [`Telemetry`] owns one `tracing` dispatcher built from [`LogConfig`]. It is
//! created once by the application and passed explicitly to the supervisor and
//! command dispatch, which attach it to each worker future. Nothing reads ambient
//! global logging state, so tests can run several applications side by side.
//!
//! Only the CLI entry point calls [`Telemetry::install_global`].

use std::future::Future;

use tracing::Dispatch;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Cheap-to-clone handle to the application's log dispatcher.
#[derive(Clone, Debug)]
pub struct Telemetry {
    dispatch: Dispatch,
}

impl Telemetry {
    /// Builds a formatter according to `cfg`. `RUST_LOG` overrides `cfg.level`.
    pub fn from_config(cfg: &LogConfig) -> Self {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

        let dispatch = match cfg.format {
            LogFormat::Json => Dispatch::new(
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_ansi(cfg.ansi)
                    .finish(),
            ),
            LogFormat::Plain => Dispatch::new(
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(cfg.ansi)
                    .with_target(false)
                    .finish(),
            ),
        };
        Self { dispatch }
    }

    /// Discards everything.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Wraps an existing dispatcher.
    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Makes this dispatcher the process-wide default.
    ///
    /// Returns `false` if a global default was already set.
    pub fn install_global(&self) -> bool {
        tracing::dispatcher::set_global_default(self.dispatch.clone()).is_ok()
    }

    /// Runs `fut` with this dispatcher as the current default.
    pub fn instrument<F: Future>(&self, fut: F) -> WithDispatch<F> {
        fut.with_subscriber(self.dispatch.clone())
    }

    /// Runs `f` with this dispatcher as the current default.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::disabled()
    }
}
