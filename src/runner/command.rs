//! Command execution
//!
//! The engine does not implement a shell. It hands command strings to a
//! [`CommandRunner`], a collaborator capable of running them with a working
//! directory, extra environment, and either streamed or captured stdio.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Output, Stdio};
use tokio::process::Command;

/// A single command to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Command text, interpreted by the runner's shell
    pub command: String,

    /// Working directory
    pub dir: PathBuf,

    /// Extra environment entries, on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl RunRequest {
    pub fn new(command: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        RunRequest {
            command: command.into(),
            dir: dir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Collaborator that runs command strings
///
/// Implementations must kill the spawned process when the returned future is
/// dropped, so that cancellation propagates to running commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command streaming its stdio, returning the exit status
    async fn run(&self, request: &RunRequest) -> io::Result<ExitStatus>;

    /// Run a command capturing its output (probes, dynamic variables)
    async fn capture(&self, request: &RunRequest) -> io::Result<Output>;
}

/// Default command runner: `sh -c` with inherited stdio
pub struct ShellRunner {
    /// Interpreter and its arguments, e.g. `["sh", "-c"]`
    interpreter: Vec<String>,
}

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner {
            interpreter: vec!["sh".to_string(), "-c".to_string()],
        }
    }

    /// Use a custom interpreter (e.g. `["bash", "-c"]`)
    pub fn with_interpreter(interpreter: Vec<String>) -> Self {
        ShellRunner { interpreter }
    }

    fn command(&self, request: &RunRequest) -> Command {
        let mut command = Command::new(&self.interpreter[0]);
        if self.interpreter.len() > 1 {
            command.args(&self.interpreter[1..]);
        }
        command.arg(&request.command);
        command.current_dir(&request.dir);
        for (key, value) in &request.env {
            command.env(key, value);
        }
        command.kill_on_drop(true);
        command
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, request: &RunRequest) -> io::Result<ExitStatus> {
        let mut command = self.command(request);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command.status().await
    }

    async fn capture(&self, request: &RunRequest) -> io::Result<Output> {
        let mut command = self.command(request);
        command.stdin(Stdio::null());
        command.output().await
    }
}
