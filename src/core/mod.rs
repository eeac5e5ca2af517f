//! Supervision core: registry, run-units and the fleet supervisor.
//!
//! - [`registry`]: the named, ordered worker collection and its admission rules;
//! - [`unit`]: run-unit handles (task or child process) over one worker;
//! - [`supervisor`]: launches every unit, polls liveness, drives graceful shutdown;
//! - [`shutdown`]: OS signal observation and child termination requests.

pub mod registry;
pub mod shutdown;
pub mod supervisor;
pub mod unit;

pub use registry::{RESERVED_NAMES, WorkerRegistry};
pub use supervisor::{RunReport, SPAWN_FAILURE_EXIT_CODE, Supervisor, UnitOutcome};
pub use unit::{PANIC_EXIT_CODE, ProcessUnit, RunUnit, TaskUnit, UnitStatus, run_to_exit_code};
