//! Assembly of runnable polling units.
//!
//! [`UnitBuilder`] gathers activities, workflows, interceptors and limits, and binds
//! them to a [`Connection`]. Building is pure: the SDK only assembles the unit.

use std::sync::Arc;

use crate::config::UnitLimits;
use crate::connection::Connection;
use crate::error::BuildError;
use crate::sdk::{ActivityRef, InterceptorRef, PollingUnit, UnitDefinition, WorkflowRef};

/// Builder for one polling unit on a task queue.
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    task_queue: String,
    activities: Vec<ActivityRef>,
    workflows: Vec<WorkflowRef>,
    interceptors: Vec<InterceptorRef>,
    limits: UnitLimits,
    client: Option<Connection>,
}

impl UnitBuilder {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            activities: Vec::new(),
            workflows: Vec::new(),
            interceptors: Vec::new(),
            limits: UnitLimits::default(),
            client: None,
        }
    }

    pub fn set_activities(&mut self, activities: Vec<ActivityRef>) -> &mut Self {
        self.activities = activities;
        self
    }

    pub fn set_workflows(&mut self, workflows: Vec<WorkflowRef>) -> &mut Self {
        self.workflows = workflows;
        self
    }

    pub fn set_interceptors(&mut self, interceptors: Vec<InterceptorRef>) -> &mut Self {
        self.interceptors = interceptors;
        self
    }

    pub fn set_limits(&mut self, limits: UnitLimits) -> &mut Self {
        self.limits = limits;
        self
    }

    /// Binds the unit to a connection. Required before [`UnitBuilder::build`].
    pub fn set_client(&mut self, client: Connection) -> &mut Self {
        self.client = Some(client);
        self
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn activities(&self) -> &[ActivityRef] {
        &self.activities
    }

    pub fn workflows(&self) -> &[WorkflowRef] {
        &self.workflows
    }

    pub fn limits(&self) -> &UnitLimits {
        &self.limits
    }

    /// Assembles the unit. Fails with [`BuildError::MissingClient`] when no
    /// connection was bound.
    pub fn build(&self) -> Result<Arc<dyn PollingUnit>, BuildError> {
        let Some(conn) = &self.client else {
            return Err(BuildError::MissingClient {
                task_queue: self.task_queue.clone(),
            });
        };

        let definition = UnitDefinition {
            task_queue: self.task_queue.clone(),
            activities: self.activities.clone(),
            workflows: self.workflows.clone(),
            interceptors: self.interceptors.clone(),
            limits: self.limits.clone(),
        };

        conn.client()
            .create_unit(definition)
            .map_err(|source| BuildError::Unit {
                task_queue: self.task_queue.clone(),
                source,
            })
    }
}
