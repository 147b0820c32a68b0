//! In-flight call deduplication
//!
//! A running call is registered under a deterministic key derived from the
//! task name and its fully resolved variables. A second identical call that
//! arrives while the first is still registered attaches to the same shared
//! future and adopts its outcome instead of re-running the commands.

use crate::error::Error;
use crate::fingerprint;
use crate::taskfile::{RunMode, Task};
use futures::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Outcome shared between the owner of an execution and its adopters
pub(crate) type SharedOutcome = Result<(), Arc<Error>>;

/// A registered execution other callers can await
pub(crate) type SharedRun = Shared<BoxFuture<'static, SharedOutcome>>;

/// Registry of currently running calls
#[derive(Default)]
pub(crate) struct InFlight {
    running: Mutex<HashMap<String, SharedRun>>,
}

impl InFlight {
    /// Register the execution built by `make` under `key`, or attach to the
    /// one already registered. Returns the future to await and whether this
    /// caller owns it (and must release the key once it completes).
    pub fn claim(&self, key: &str, make: impl FnOnce() -> SharedRun) -> (SharedRun, bool) {
        let mut running = self.running.lock().expect("in-flight registry poisoned");
        if let Some(existing) = running.get(key) {
            return (existing.clone(), false);
        }
        let run = make();
        running.insert(key.to_string(), run.clone());
        (run, true)
    }

    /// Remove a completed execution
    pub fn release(&self, key: &str) {
        self.running
            .lock()
            .expect("in-flight registry poisoned")
            .remove(key);
    }
}

/// Completed-run memory for `Once` and `WhenChanged` tasks
#[derive(Default)]
pub(crate) struct Completed {
    outcomes: Mutex<HashMap<String, SharedOutcome>>,
}

impl Completed {
    pub fn get(&self, key: &str) -> Option<SharedOutcome> {
        self.outcomes
            .lock()
            .expect("completed-run memory poisoned")
            .get(key)
            .cloned()
    }

    pub fn record(&self, key: String, outcome: SharedOutcome) {
        self.outcomes
            .lock()
            .expect("completed-run memory poisoned")
            .insert(key, outcome);
    }
}

/// Key identifying one (task, resolved variables) execution
pub(crate) fn execution_key(task: &Task) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.name.as_bytes());
    hasher.update([0]);
    for (name, var) in task.vars.iter() {
        hasher.update(name.as_bytes());
        hasher.update([b'=']);
        hasher.update(var.as_str().unwrap_or_default().as_bytes());
        hasher.update([b'\n']);
    }
    fingerprint::to_hex(hasher.finalize().as_slice())
}

/// Completed-run memory key, if the task's run mode keeps one
pub(crate) fn run_mode_key(task: &Task) -> Option<String> {
    match task.run {
        RunMode::Always => None,
        RunMode::Once => Some(format!("once:{}", task.name)),
        RunMode::WhenChanged => Some(execution_key(task)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taskfile::Vars;

    fn task_with_vars(name: &str, entries: &[(&str, &str)]) -> Task {
        let mut vars = Vars::new();
        for (key, value) in entries {
            vars.set_value(*key, *value);
        }
        Task {
            name: name.to_string(),
            vars,
            ..Task::default()
        }
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = task_with_vars("build", &[("X", "1"), ("Y", "2")]);
        let b = task_with_vars("build", &[("X", "1"), ("Y", "2")]);
        assert_eq!(execution_key(&a), execution_key(&b));
    }

    #[test]
    fn test_key_depends_on_vars_and_name() {
        let base = task_with_vars("build", &[("X", "1")]);
        let other_value = task_with_vars("build", &[("X", "2")]);
        let other_name = task_with_vars("test", &[("X", "1")]);
        assert_ne!(execution_key(&base), execution_key(&other_value));
        assert_ne!(execution_key(&base), execution_key(&other_name));
    }

    #[test]
    fn test_run_mode_keys() {
        let mut task = task_with_vars("build", &[("X", "1")]);
        assert_eq!(run_mode_key(&task), None);

        task.run = RunMode::Once;
        assert_eq!(run_mode_key(&task), Some("once:build".to_string()));

        task.run = RunMode::WhenChanged;
        assert_eq!(run_mode_key(&task), Some(execution_key(&task)));
    }

    #[test]
    fn test_claim_attaches_to_existing() {
        use futures::FutureExt;

        fn finished() -> SharedRun {
            async { Ok(()) }.boxed().shared()
        }

        let registry = InFlight::default();

        let (_first, owner) = registry.claim("key", finished);
        assert!(owner);

        let (_second, owner) = registry.claim("key", || unreachable!());
        assert!(!owner);

        registry.release("key");
        let (_third, owner) = registry.claim("key", finished);
        assert!(owner);
    }
}
