//! Task, call and command definitions
//!
//! This is the static model the scheduler consumes. A parsing layer fills it
//! from task definition documents; the engine never mutates the canonical
//! definitions, only compiled copies of them.

use crate::taskfile::vars::Vars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The set of known tasks, keyed by name
pub type Tasks = HashMap<String, Task>;

/// A task definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Task name
    pub name: String,

    /// Commands to execute, in order
    pub cmds: Vec<Cmd>,

    /// Tasks that must complete before this one runs
    pub deps: Vec<Dep>,

    /// Glob patterns for input files; a leading `!` excludes matches
    pub sources: Vec<String>,

    /// Glob patterns for produced files; a leading `!` excludes matches
    pub generates: Vec<String>,

    /// Shell probes; the task is up to date only if every probe exits zero
    pub status: Vec<String>,

    /// Probes that must pass before the task may run
    pub preconditions: Vec<Precondition>,

    /// Variables that must be set (optionally to an allowed value)
    pub requires: Vec<RequiredVar>,

    /// Task-scoped variables
    pub vars: Vars,

    /// Extra environment for spawned commands
    pub env: Vars,

    /// Variables handed down by the file that included this task
    pub inherited_vars: Vars,

    /// How the sources check decides up-to-dateness
    pub method: Method,

    /// How repeated calls within one run are treated
    pub run: RunMode,

    /// Lifecycle hook commands
    pub hooks: Hooks,

    /// Working directory, relative to the root directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Suppress command echo for the whole task
    pub silent: bool,

    /// Task may only be called by other tasks, never directly
    pub internal: bool,

    /// Source location for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Task {
    /// The directory this task's commands and globs resolve against
    pub fn directory(&self, root: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) if !dir.is_empty() => root.join(dir),
            _ => root.to_path_buf(),
        }
    }

    /// Resolved environment entries for spawned commands
    ///
    /// Entries that are not literal values (e.g. dynamic vars left
    /// unresolved by a fast compile) are omitted.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .filter_map(|(name, var)| {
                var.as_str().map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    }
}

/// An invocation of a task with a specific variable overlay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Call {
    /// Name of the task to run (may match a wildcard task)
    pub task: String,

    /// Call-site variable overrides
    #[serde(default)]
    pub vars: Vars,

    /// Suppress command echo for this call
    #[serde(default)]
    pub silent: bool,

    /// Whether the user issued this call, as opposed to another task
    #[serde(default = "default_direct")]
    pub direct: bool,
}

fn default_direct() -> bool {
    true
}

impl Call {
    /// A direct call, as issued by the user
    pub fn new(task: impl Into<String>) -> Self {
        Call {
            task: task.into(),
            vars: Vars::new(),
            silent: false,
            direct: true,
        }
    }

    /// An indirect call, issued on behalf of another task
    pub fn indirect(task: impl Into<String>) -> Self {
        Call {
            direct: false,
            ..Call::new(task)
        }
    }

    /// Attach call-site variables
    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.vars = vars;
        self
    }
}

/// A command within a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cmd {
    /// Simple shell command string
    Shell(String),

    /// Detailed command with flags, or a nested task call
    Detailed(CmdDetail),
}

/// Detailed command specification
///
/// Exactly one of `cmd` and `task` is populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdDetail {
    /// Shell command to execute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Name of a task to run in place of a shell command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Variables passed to the called task
    pub vars: Vars,

    /// Suppress the command echo
    pub silent: bool,

    /// A non-zero exit does not abort the command list
    pub ignore_error: bool,

    /// Run after the main command list, regardless of its outcome
    pub defer: bool,
}

impl Cmd {
    /// Shorthand for a plain shell command
    pub fn shell(cmd: impl Into<String>) -> Self {
        Cmd::Shell(cmd.into())
    }

    /// Shorthand for a nested task call
    pub fn task(name: impl Into<String>) -> Self {
        Cmd::Detailed(CmdDetail {
            task: Some(name.into()),
            ..CmdDetail::default()
        })
    }

    /// The shell command text, if this is a shell command
    pub fn command(&self) -> Option<&str> {
        match self {
            Cmd::Shell(cmd) => Some(cmd),
            Cmd::Detailed(detail) => detail.cmd.as_deref(),
        }
    }

    /// The called task's name and variables, if this is a task call
    pub fn task_call(&self) -> Option<(&str, &Vars)> {
        match self {
            Cmd::Shell(_) => None,
            Cmd::Detailed(detail) => detail.task.as_deref().map(|name| (name, &detail.vars)),
        }
    }

    pub fn is_silent(&self) -> bool {
        matches!(self, Cmd::Detailed(detail) if detail.silent)
    }

    pub fn is_ignore_error(&self) -> bool {
        matches!(self, Cmd::Detailed(detail) if detail.ignore_error)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Cmd::Detailed(detail) if detail.defer)
    }
}

/// A static dependency on another task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dep {
    /// Plain task name
    Name(String),

    /// Task name with call-site variables
    Detailed(DepDetail),
}

/// Detailed dependency specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepDetail {
    pub task: String,

    #[serde(default)]
    pub vars: Vars,

    #[serde(default)]
    pub silent: bool,
}

impl Dep {
    /// The depended-on task's name
    pub fn name(&self) -> &str {
        match self {
            Dep::Name(name) => name,
            Dep::Detailed(detail) => &detail.task,
        }
    }

    /// The call this dependency issues
    pub fn to_call(&self) -> Call {
        match self {
            Dep::Name(name) => Call::indirect(name.clone()),
            Dep::Detailed(detail) => Call {
                task: detail.task.clone(),
                vars: detail.vars.clone(),
                silent: detail.silent,
                direct: false,
            },
        }
    }
}

/// A probe that must pass before a task may run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    /// Probe command; a non-zero exit fails the precondition
    pub sh: String,

    /// Message reported on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Precondition {
    /// The message reported when this precondition fails
    pub fn message(&self) -> String {
        self.msg
            .clone()
            .unwrap_or_else(|| format!("`{}` failed", self.sh))
    }
}

/// A variable that must be set for a task to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredVar {
    pub name: String,

    /// When present, the resolved value must be one of these
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

/// Lifecycle hook command lists
///
/// Hooks are best-effort: a failing hook is logged and never changes the
/// task's own outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hooks {
    /// Before the command list starts
    pub before_all: Vec<Cmd>,

    /// After everything else, success or failure
    pub after_all: Vec<Cmd>,

    /// After the command list succeeded
    pub on_success: Vec<Cmd>,

    /// After the command list (or a precondition) failed
    pub on_failure: Vec<Cmd>,

    /// When the task was skipped as up to date
    pub on_skipped: Vec<Cmd>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.before_all.is_empty()
            && self.after_all.is_empty()
            && self.on_success.is_empty()
            && self.on_failure.is_empty()
            && self.on_skipped.is_empty()
    }
}

/// Sources check strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Content hashing of sources and generates
    #[default]
    Checksum,

    /// Modification time comparison
    Timestamp,

    /// Never up to date
    None,
}

/// How repeated calls of one task within a run are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every call runs
    #[default]
    Always,

    /// The first call runs; later calls adopt its outcome
    Once,

    /// Calls with a new set of resolved variables run
    WhenChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_cmd_forms() {
        let shell: Cmd = serde_json::from_str("\"echo hi\"").unwrap();
        assert_eq!(shell.command(), Some("echo hi"));
        assert!(shell.task_call().is_none());

        let detailed: Cmd =
            serde_json::from_str(r#"{"cmd": "rm -rf build", "defer": true}"#).unwrap();
        assert!(detailed.is_deferred());
        assert_eq!(detailed.command(), Some("rm -rf build"));

        let call: Cmd = serde_json::from_str(r#"{"task": "clean", "vars": {"X": "1"}}"#).unwrap();
        let (name, vars) = call.task_call().unwrap();
        assert_eq!(name, "clean");
        assert_eq!(vars.get_value("X"), Some("1"));
    }

    #[test]
    fn test_deserialize_task_defaults() {
        let task: Task = serde_json::from_str(r#"{"name": "build"}"#).unwrap();
        assert_eq!(task.method, Method::Checksum);
        assert_eq!(task.run, RunMode::Always);
        assert!(task.cmds.is_empty());
        assert!(!task.internal);
        assert!(task.hooks.is_empty());
    }

    #[test]
    fn test_dep_to_call_is_indirect() {
        let dep: Dep = serde_json::from_str("\"prepare\"").unwrap();
        let call = dep.to_call();
        assert_eq!(call.task, "prepare");
        assert!(!call.direct);

        let detailed: Dep =
            serde_json::from_str(r#"{"task": "prepare", "vars": {"MODE": "fast"}}"#).unwrap();
        let call = detailed.to_call();
        assert_eq!(call.vars.get_value("MODE"), Some("fast"));
    }

    #[test]
    fn test_task_directory() {
        let task = Task {
            name: "build".to_string(),
            dir: Some("web".to_string()),
            ..Task::default()
        };
        assert_eq!(
            task.directory(Path::new("/repo")),
            PathBuf::from("/repo/web")
        );

        let rootless = Task::default();
        assert_eq!(rootless.directory(Path::new("/repo")), PathBuf::from("/repo"));
    }

    #[test]
    fn test_precondition_message_falls_back_to_command() {
        let with_msg = Precondition {
            sh: "test -f a".to_string(),
            msg: Some("a missing".to_string()),
        };
        assert_eq!(with_msg.message(), "a missing");

        let without = Precondition {
            sh: "test -f a".to_string(),
            msg: None,
        };
        assert_eq!(without.message(), "`test -f a` failed");
    }

    #[test]
    fn test_method_and_run_mode_names() {
        let method: Method = serde_json::from_str("\"timestamp\"").unwrap();
        assert_eq!(method, Method::Timestamp);

        let run: RunMode = serde_json::from_str("\"when_changed\"").unwrap();
        assert_eq!(run, RunMode::WhenChanged);
    }
}
