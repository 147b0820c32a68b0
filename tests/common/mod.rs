//! Common test utilities

use async_trait::async_trait;
use rask::runner::{CommandRunner, RunRequest, ShellRunner};
use rask::taskfile::{Cmd, Task, Tasks};
use rask::{Compiler, Fingerprint, Runner};
use std::fs;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};

/// Build a runner rooted at `work`, keeping fingerprint state under `state`
pub fn engine(work: &Path, state: &Path, tasks: Tasks) -> Runner {
    let compiler = Compiler::new(work);
    let fingerprint = Fingerprint::new(state, work);
    Runner::new(tasks, compiler, fingerprint).unwrap()
}

/// A task running plain shell commands
pub fn shell_task(name: &str, cmds: &[&str]) -> Task {
    Task {
        name: name.to_string(),
        cmds: cmds.iter().map(|c| Cmd::shell(*c)).collect(),
        ..Task::default()
    }
}

/// Key a list of tasks by name
pub fn task_set(tasks: Vec<Task>) -> Tasks {
    tasks
        .into_iter()
        .map(|task| (task.name.clone(), task))
        .collect()
}

/// Read a log file written by task commands, line by line
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Command runner that records every command it is asked to run
pub struct RecordingRunner {
    inner: ShellRunner,
    seen: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingRunner {
            inner: ShellRunner::new(),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, request: &RunRequest) -> io::Result<ExitStatus> {
        self.seen.lock().unwrap().push(request.command.clone());
        self.inner.run(request).await
    }

    async fn capture(&self, request: &RunRequest) -> io::Result<Output> {
        self.seen.lock().unwrap().push(request.command.clone());
        self.inner.capture(request).await
    }
}
