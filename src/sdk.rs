//! # Durable-execution collaborator contracts.
//!
//! fleetvisor does not implement task-queue polling, workflow determinism or
//! activity retries. It consumes an SDK through the traits below:
//!
//! ```text
//! Connector::connect(settings, runtime) ──► ExecutionClient
//!                                              ├─► create_unit(UnitDefinition) ──► PollingUnit
//!                                              └─► start_cron_workflow(CronStart)
//!
//! PollingUnit::run()       suspends until the unit stops
//! PollingUnit::shutdown()  suspends until in-flight tasks are drained
//! ```
//!
//! Activity, workflow and interceptor references are opaque to fleetvisor: they
//! carry a stable name (for logs and validation) and a type-erased handle the SDK
//! downcasts back to its own types.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::UnitLimits;
use crate::connection::ConnectionSettings;
use crate::error::SdkError;
use crate::runtime::Runtime;

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $ty:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $ty {
            name: Cow<'static, str>,
            handle: Arc<dyn Any + Send + Sync>,
        }

        impl $ty {
            /// Wraps an SDK-specific handle under a stable name.
            pub fn new<T: Any + Send + Sync>(name: impl Into<Cow<'static, str>>, handle: T) -> Self {
                Self {
                    name: name.into(),
                    handle: Arc::new(handle),
                }
            }

            /// A reference that carries only a name.
            pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
                Self::new(name, ())
            }

            /// Stable name of the referenced definition.
            pub fn name(&self) -> &str {
                &self.name
            }

            /// Returns the handle if it has type `T`.
            pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
                self.handle.downcast_ref::<T>()
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($ty)).field(&self.name).finish()
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.name == other.name && Arc::ptr_eq(&self.handle, &other.handle)
            }
        }
    };
}

opaque_ref!(
    /// Reference to an activity handler.
    ActivityRef
);
opaque_ref!(
    /// Reference to a workflow type.
    WorkflowRef
);
opaque_ref!(
    /// Reference to a worker interceptor.
    InterceptorRef
);

/// Everything the SDK needs to assemble one polling unit.
#[derive(Clone, Debug)]
pub struct UnitDefinition {
    pub task_queue: String,
    pub activities: Vec<ActivityRef>,
    pub workflows: Vec<WorkflowRef>,
    pub interceptors: Vec<InterceptorRef>,
    pub limits: UnitLimits,
}

/// A request to start a workflow on a recurring schedule.
#[derive(Clone, Debug)]
pub struct CronStart {
    /// Unique workflow id for this start request.
    pub workflow_id: String,
    pub workflow: WorkflowRef,
    pub task_queue: String,
    pub schedule: String,
}

/// Entry point of the durable-execution SDK.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Performs the network handshake with the configured endpoint.
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        runtime: &Runtime,
    ) -> Result<Arc<dyn ExecutionClient>, SdkError>;
}

/// A live connection to the durable-execution service.
#[async_trait]
pub trait ExecutionClient: Send + Sync + 'static {
    /// Assembles a polling unit bound to this client. Pure; no I/O.
    fn create_unit(&self, definition: UnitDefinition) -> Result<Arc<dyn PollingUnit>, SdkError>;

    /// Issues one "start workflow with cron schedule" call.
    async fn start_cron_workflow(&self, request: CronStart) -> Result<(), SdkError>;
}

/// A runnable task-queue poller produced by the SDK.
#[async_trait]
pub trait PollingUnit: Send + Sync + 'static {
    /// Polls the task queue until stopped.
    async fn run(&self) -> Result<(), SdkError>;

    /// Stops polling and drains in-flight tasks.
    async fn shutdown(&self) -> Result<(), SdkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SendEmail;

    #[test]
    fn refs_keep_name_and_handle() {
        let act = ActivityRef::new("send_email", SendEmail);
        assert_eq!(act.name(), "send_email");
        assert!(act.downcast_ref::<SendEmail>().is_some());
        assert!(act.downcast_ref::<String>().is_none());
        assert_eq!(act, act.clone());
    }

    #[test]
    fn named_refs_are_distinct_handles() {
        let a = WorkflowRef::named("Order");
        let b = WorkflowRef::named("Order");
        assert_eq!(a.name(), b.name());
        assert_ne!(a, b);
    }
}
