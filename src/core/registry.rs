//! # Worker registry: the single admission point for workers.
//!
//! ## Rules
//! - Names are unique (exact, case-sensitive match).
//! - [`RESERVED_NAMES`] belong to the command vocabulary and are never admitted.
//! - An entry is never replaced: a duplicate insert is an error, not an overwrite.
//! - Insertion order is preserved and is the launch order of `run all`.
//!
//! The registry is mutated only during setup; once supervision begins it is read
//! through [`WorkerRegistry::get_all`], which hands out an independent copy.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistrationError;
use crate::workers::{Worker, WorkerKind};

/// Names that can never be used for a worker.
pub const RESERVED_NAMES: &[&str] = &["all", "run", "exec", "cron"];

/// Ordered, uniquely-named collection of workers.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Vec<Arc<dyn Worker>>,
    index: HashMap<String, usize>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `name` without inserting anything.
    pub fn check_name(&self, name: &str) -> Result<(), RegistrationError> {
        if RESERVED_NAMES.contains(&name) {
            return Err(RegistrationError::NameReserved {
                name: name.to_string(),
            });
        }
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(RegistrationError::InvalidName {
                name: name.to_string(),
            });
        }
        if self.index.contains_key(name) {
            return Err(RegistrationError::NameConflict {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Admits `worker` under its own name.
    pub fn insert(&mut self, worker: Arc<dyn Worker>) -> Result<(), RegistrationError> {
        let name = worker.name().to_string();
        self.check_name(&name)?;
        self.index.insert(name, self.workers.len());
        self.workers.push(worker);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.index.get(name).map(|&i| Arc::clone(&self.workers[i]))
    }

    /// All workers in registration order (an independent copy).
    pub fn get_all(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.clone()
    }

    /// Workers launched by `run all`: everything except exec commands.
    pub fn supervised(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .iter()
            .filter(|w| w.kind() != WorkerKind::ExecOnce)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{ExecFn, ExecWorker};

    fn exec(name: &str) -> Arc<dyn Worker> {
        let noop: ExecFn = Arc::new(|| Ok(()));
        Arc::new(ExecWorker::new(name, noop))
    }

    #[test]
    fn duplicate_names_are_rejected_and_not_counted() {
        let mut reg = WorkerRegistry::new();
        let names = ["a", "b", "a", "c", "b"];
        let mut ok = 0;
        for n in names {
            match reg.insert(exec(n)) {
                Ok(()) => ok += 1,
                Err(e) => assert_eq!(e, RegistrationError::NameConflict { name: n.into() }),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reserved_names_are_always_rejected() {
        let mut reg = WorkerRegistry::new();
        for name in RESERVED_NAMES {
            assert_eq!(
                reg.insert(exec(name)),
                Err(RegistrationError::NameReserved {
                    name: name.to_string()
                })
            );
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn blank_names_are_invalid() {
        let reg = WorkerRegistry::new();
        assert!(matches!(
            reg.check_name(""),
            Err(RegistrationError::InvalidName { .. })
        ));
        assert!(matches!(
            reg.check_name("two words"),
            Err(RegistrationError::InvalidName { .. })
        ));
        assert!(reg.check_name("All").is_ok());
    }

    #[test]
    fn get_all_is_a_defensive_copy() {
        let mut reg = WorkerRegistry::new();
        reg.insert(exec("a")).unwrap();
        let mut copy = reg.get_all();
        copy.clear();
        assert_eq!(reg.len(), 1);
        assert!(reg.get("a").is_some());
    }

    #[test]
    fn exec_commands_are_not_supervised() {
        let mut reg = WorkerRegistry::new();
        reg.insert(exec("migrate")).unwrap();
        assert!(reg.supervised().is_empty());
        assert_eq!(reg.get_all().len(), 1);
    }
}
