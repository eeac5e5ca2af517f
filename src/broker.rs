//! Message-broker consumer contract.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SdkError;

/// Options handed to a broker application's run loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub log_level: String,
    /// Free-form settings forwarded verbatim to the broker client.
    pub extra: BTreeMap<String, String>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl ConsumerOptions {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A broker consumer application (queue subscriptions plus handlers).
#[async_trait]
pub trait BrokerApp: Send + Sync + 'static {
    /// Consumes messages until stopped.
    async fn run(&self, options: &ConsumerOptions) -> Result<(), SdkError>;

    /// Requests a graceful stop; `run` returns once in-flight messages are handled.
    async fn stop(&self) -> Result<(), SdkError>;
}
