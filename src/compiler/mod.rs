//! Variable compilation
//!
//! The compiler resolves the effective variable mapping for one task
//! invocation and rewrites a deep copy of the task with every templated
//! field resolved. Precedence, lowest to highest: process environment,
//! built-in special variables, file-scope env and vars, inherited vars,
//! call-site vars, the task's own vars. Each layer is templated against the
//! mapping accumulated so far, so later layers can reference earlier ones.

pub mod template;

pub use template::{template, template_list, template_opt};

use crate::error::{CompileError, Result};
use crate::runner::{CommandRunner, RunRequest, ShellRunner};
use crate::taskfile::{Call, Cmd, Dep, Task, Var, Vars};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Compiles the effective variables for task invocations
///
/// One compiler instance is scoped to one root configuration. Dynamic
/// variable results are memoized per (working directory, command text) for
/// the lifetime of the instance; the cache is safe to hit from concurrent
/// dependency compilations.
pub struct Compiler {
    /// Directory of the entry task file
    root_dir: PathBuf,

    /// Path of the entry task file
    entrypoint: PathBuf,

    /// Directory the user invoked the tool from
    working_dir: PathBuf,

    /// File-scope environment
    env: Vars,

    /// File-scope variables
    vars: Vars,

    /// Path of the invoking executable
    executable: PathBuf,

    executor: Arc<dyn CommandRunner>,

    dynamic_cache: Mutex<HashMap<String, String>>,
}

impl Compiler {
    /// Create a compiler rooted at the entry task file's directory
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        Compiler {
            entrypoint: root_dir.clone(),
            working_dir: env::current_dir().unwrap_or_else(|_| root_dir.clone()),
            executable: env::current_exe().unwrap_or_default(),
            root_dir,
            env: Vars::new(),
            vars: Vars::new(),
            executor: Arc::new(ShellRunner::new()),
            dynamic_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Set the entry task file path
    pub fn with_entrypoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.entrypoint = path.into();
        self
    }

    /// Set the directory the user invoked the tool from
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the file-scope environment
    pub fn with_env(mut self, env: Vars) -> Self {
        self.env = env;
        self
    }

    /// Set the file-scope variables
    pub fn with_vars(mut self, vars: Vars) -> Self {
        self.vars = vars;
        self
    }

    /// Use a custom command runner for dynamic variable evaluation
    pub fn with_executor(mut self, executor: Arc<dyn CommandRunner>) -> Self {
        self.executor = executor;
        self
    }

    /// The directory of the entry task file
    pub fn root_dir(&self) -> &PathBuf {
        &self.root_dir
    }

    /// Compile a task, evaluating dynamic variables
    ///
    /// Returns a deep copy with every templated field resolved and `vars`
    /// replaced by the effective mapping.
    pub async fn compile_task(&self, task: &Task, call: &Call) -> Result<Task> {
        self.compile_inner(task, call, true).await
    }

    /// Compile a task without evaluating dynamic variables
    ///
    /// For listing and summary paths that must not trigger side-effecting
    /// shell commands; dynamic variables stay unresolved.
    pub async fn fast_compile_task(&self, task: &Task, call: &Call) -> Result<Task> {
        self.compile_inner(task, call, false).await
    }

    /// Compile the effective variable mapping for a task invocation
    pub async fn compile_vars(
        &self,
        task: &Task,
        call: &Call,
        evaluate_dynamic: bool,
    ) -> Result<Vars> {
        let mut result = Vars::new();

        // (1) process environment
        for (name, value) in env::vars() {
            result.set_value(name, value);
        }

        // (2) built-in special variables
        result.set_value("TASK_EXE", self.executable.display().to_string());
        result.set_value("TASKFILE", self.entrypoint.display().to_string());
        result.set_value("TASKFILE_DIR", self.root_dir.display().to_string());
        result.set_value("USER_WORKING_DIR", self.working_dir.display().to_string());
        result.set_value("TASK", task.name.clone());
        result.set_value(
            "TASK_DIR",
            task.directory(&self.root_dir).display().to_string(),
        );
        result.set_value("TASK_VERSION", crate::VERSION);
        result.set_value("ALIAS", call.task.clone());

        // (3)..(6) declared layers, later layers overriding earlier ones
        let layers = [
            &self.env,
            &self.vars,
            &task.inherited_vars,
            &call.vars,
            &task.vars,
        ];
        for layer in layers {
            for (name, var) in layer.iter() {
                let resolved = self
                    .resolve_var(var, task, &result, evaluate_dynamic)
                    .await?;
                result.set(name, resolved);
            }
        }

        Ok(result)
    }

    /// Clear memoized dynamic variable results
    pub async fn reset_cache(&self) {
        self.dynamic_cache.lock().await.clear();
    }

    async fn compile_inner(&self, task: &Task, call: &Call, evaluate_dynamic: bool) -> Result<Task> {
        let vars = self.compile_vars(task, call, evaluate_dynamic).await?;

        let mut compiled = task.clone();

        for cmd in &mut compiled.cmds {
            template_cmd(cmd, &vars);
        }
        for hook in [
            &mut compiled.hooks.before_all,
            &mut compiled.hooks.after_all,
            &mut compiled.hooks.on_success,
            &mut compiled.hooks.on_failure,
            &mut compiled.hooks.on_skipped,
        ] {
            for cmd in hook.iter_mut() {
                template_cmd(cmd, &vars);
            }
        }
        for dep in &mut compiled.deps {
            template_dep(dep, &vars);
        }
        compiled.sources = template_list(&compiled.sources, &vars);
        compiled.generates = template_list(&compiled.generates, &vars);
        compiled.status = template_list(&compiled.status, &vars);
        for precondition in &mut compiled.preconditions {
            precondition.sh = template(&precondition.sh, &vars);
            template_opt(&mut precondition.msg, &vars);
        }
        template_opt(&mut compiled.dir, &vars);

        // Task env entries resolve against the final mapping.
        let mut compiled_env = Vars::new();
        for (name, var) in task.env.iter() {
            let resolved = self.resolve_var(var, task, &vars, evaluate_dynamic).await?;
            compiled_env.set(name, resolved);
        }
        compiled.env = compiled_env;
        compiled.vars = vars;

        Ok(compiled)
    }

    async fn resolve_var(
        &self,
        var: &Var,
        task: &Task,
        accumulated: &Vars,
        evaluate_dynamic: bool,
    ) -> Result<Var> {
        match var {
            Var::Value(value) => Ok(Var::Value(template(value, accumulated))),
            Var::Ref { reference } => Ok(Var::Value(
                accumulated
                    .get_value(reference)
                    .unwrap_or_default()
                    .to_string(),
            )),
            Var::Dynamic { sh, dir } => {
                if !evaluate_dynamic {
                    return Ok(var.clone());
                }
                let command = template(sh, accumulated);
                let base = task.directory(&self.root_dir);
                let dir = match dir {
                    Some(dir) => base.join(template(dir, accumulated)),
                    None => base,
                };
                let value = self.evaluate_dynamic(&command, dir).await?;
                Ok(Var::Value(value))
            }
        }
    }

    /// Run a dynamic variable's command, memoized per (dir, command)
    ///
    /// The cache lock is held across evaluation so that concurrent compiles
    /// of the same command run it exactly once.
    async fn evaluate_dynamic(&self, command: &str, dir: PathBuf) -> Result<String> {
        let key = format!("{}\u{0}{}", dir.display(), command);

        let mut cache = self.dynamic_cache.lock().await;
        if let Some(value) = cache.get(&key) {
            return Ok(value.clone());
        }

        let request = RunRequest::new(command, dir);
        let output = self.executor.capture(&request).await.map_err(|err| {
            CompileError::DynamicVar {
                command: command.to_string(),
                cause: err.to_string(),
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompileError::DynamicVar {
                command: command.to_string(),
                cause: format!("{} ({})", output.status, stderr.trim()),
            }
            .into());
        }

        let mut value = String::from_utf8_lossy(&output.stdout).into_owned();
        strip_trailing_newline(&mut value);
        tracing::debug!(command, value = %value, "evaluated dynamic variable");

        cache.insert(key, value.clone());
        Ok(value)
    }
}

fn template_cmd(cmd: &mut Cmd, vars: &Vars) {
    match cmd {
        Cmd::Shell(command) => *command = template(command, vars),
        Cmd::Detailed(detail) => {
            template_opt(&mut detail.cmd, vars);
            template_opt(&mut detail.task, vars);
            template_var_values(&mut detail.vars, vars);
        }
    }
}

fn template_dep(dep: &mut Dep, vars: &Vars) {
    match dep {
        Dep::Name(name) => *name = template(name, vars),
        Dep::Detailed(detail) => {
            detail.task = template(&detail.task, vars);
            template_var_values(&mut detail.vars, vars);
        }
    }
}

fn template_var_values(target: &mut Vars, vars: &Vars) {
    let templated: Vec<(String, Var)> = target
        .iter()
        .map(|(name, var)| {
            let value = match var {
                Var::Value(value) => Var::Value(template(value, vars)),
                other => other.clone(),
            };
            (name.to_string(), value)
        })
        .collect();
    for (name, var) in templated {
        target.set(name, var);
    }
}

/// Strip one trailing newline (LF or CRLF) from a dynamic variable's stdout
fn strip_trailing_newline(value: &mut String) {
    if value.ends_with('\n') {
        value.pop();
        if value.ends_with('\r') {
            value.pop();
        }
    }
}
