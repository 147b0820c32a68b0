//! Task execution scheduling
//!
//! The runner walks the dependency graph for each call, gates command
//! execution behind an optional concurrency limit, deduplicates identical
//! in-flight calls, consults the fingerprint engine before running, and
//! fires lifecycle hooks around the command list.

pub mod command;
pub mod dedup;

// Re-export main types
pub use command::{CommandRunner, RunRequest, ShellRunner};

use crate::compiler::Compiler;
use crate::error::{Error, Result, RunError};
use crate::fingerprint::{DefinitionChecker, Fingerprint};
use crate::taskfile::{graph, Call, Cmd, Dep, Task, Tasks};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Ceiling on how often one task may be invoked within a single run; a
/// task-level command calling back into its own ancestry would otherwise
/// recurse forever.
const MAX_CALLS_PER_TASK: u32 = 100;

/// Concurrency permit held while a task runs its own commands
type Permit = Option<OwnedSemaphorePermit>;

/// Schedules and executes task calls
///
/// Cloning is cheap; all shared state lives behind `Arc`s, so the runner
/// can recurse into dependency calls from concurrent futures.
#[derive(Clone)]
pub struct Runner {
    tasks: Arc<Tasks>,
    compiler: Arc<Compiler>,
    fingerprint: Arc<Fingerprint>,
    executor: Arc<dyn CommandRunner>,

    /// Bounds how many tasks run their commands at once; `None` = unbounded
    semaphore: Option<Arc<Semaphore>>,

    inflight: Arc<dedup::InFlight>,
    completed: Arc<dedup::Completed>,
    call_counts: Arc<Mutex<HashMap<String, u32>>>,
    definition: Option<Arc<DefinitionChecker>>,
    cancel: Arc<watch::Sender<bool>>,
    force: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.tasks)
            .field("semaphore", &self.semaphore)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner for a task set
    ///
    /// Fails fast if the static dependency graph contains a cycle, so no
    /// command ever runs for a cyclic configuration.
    pub fn new(mut tasks: Tasks, compiler: Compiler, fingerprint: Fingerprint) -> Result<Self> {
        for (name, task) in tasks.iter_mut() {
            if task.name.is_empty() {
                task.name = name.clone();
            }
        }
        if let Some(cycle) = graph::find_cycle(&tasks) {
            return Err(RunError::CircularDependency(cycle.join(" -> ")).into());
        }

        let (cancel, _) = watch::channel(false);
        Ok(Runner {
            tasks: Arc::new(tasks),
            compiler: Arc::new(compiler),
            fingerprint: Arc::new(fingerprint),
            executor: Arc::new(ShellRunner::new()),
            semaphore: None,
            inflight: Arc::new(dedup::InFlight::default()),
            completed: Arc::new(dedup::Completed::default()),
            call_counts: Arc::new(Mutex::new(HashMap::new())),
            definition: None,
            cancel: Arc::new(cancel),
            force: false,
        })
    }

    /// Use a custom command runner
    pub fn with_executor(mut self, executor: Arc<dyn CommandRunner>) -> Self {
        self.executor = executor;
        self
    }

    /// Bound how many tasks may run their commands simultaneously; 0 lifts
    /// the bound
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        self
    }

    /// Run tasks even when they are up to date
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Also re-run tasks whose definition changed since their last success
    pub fn with_definition_check(mut self, enabled: bool) -> Self {
        self.definition = enabled.then(|| Arc::new(self.fingerprint.definition_checker()));
        self
    }

    /// Interrupt the run: running commands are killed and pending waits
    /// unblock with an interrupt error
    pub fn interrupt(&self) {
        self.cancel.send_replace(true);
    }

    /// Run a call to completion
    pub async fn run(&self, call: Call) -> Result<()> {
        self.run_call(call).await
    }

    /// Boxed recursion point used for dependencies and task-level commands
    fn run_call(&self, call: Call) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move { this.run_call_inner(call).await }.boxed()
    }

    async fn run_call_inner(&self, call: Call) -> Result<()> {
        let (task, call) = self.resolve(&call)?;
        if task.internal && call.direct {
            return Err(RunError::InternalTask(task.name).into());
        }
        self.bump_call_count(&task.name)?;

        let compiled = self.compiler.compile_task(&task, &call).await?;
        self.check_requires(&compiled)?;

        // Run-mode memory: a completed Once/WhenChanged execution is adopted
        // outright.
        let memory_key = dedup::run_mode_key(&compiled);
        if let Some(key) = &memory_key {
            if let Some(outcome) = self.completed.get(key) {
                tracing::debug!(task = %compiled.name, "adopting completed run outcome");
                return outcome.map_err(Error::Shared);
            }
        }

        let key = dedup::execution_key(&compiled);
        let (run, owner) = self.inflight.claim(&key, || {
            let this = self.clone();
            let compiled = compiled.clone();
            let task = task.clone();
            let call = call.clone();
            async move { this.execute(task, compiled, call).await.map_err(Arc::new) }
                .boxed()
                .shared()
        });
        if !owner {
            tracing::debug!(task = %compiled.name, "attaching to in-flight execution");
        }

        let outcome = run.await;
        if owner {
            self.inflight.release(&key);
            if let Some(key) = memory_key {
                self.completed.record(key, outcome.clone());
            }
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(shared) => Err(match Arc::try_unwrap(shared) {
                Ok(err) => err,
                Err(shared) => Error::Shared(shared),
            }),
        }
    }

    /// One full task execution, from dependencies to state persistence
    async fn execute(self, original: Task, task: Task, call: Call) -> Result<()> {
        if !task.deps.is_empty() {
            tracing::debug!(task = %task.name, count = task.deps.len(), "running dependencies");
            let dep_runs = task
                .deps
                .iter()
                .map(Dep::to_call)
                .map(|dep_call| self.run_call(dep_call));
            try_join_all(dep_runs).await?;
        }

        if let Err(err) = self.check_preconditions(&task).await {
            let mut permit = None;
            self.run_hooks(&task, &call, &task.hooks.on_failure, "on_failure", &mut permit)
                .await;
            self.run_hooks(&task, &call, &task.hooks.after_all, "after_all", &mut permit)
                .await;
            return Err(err);
        }

        if !self.force && self.is_up_to_date(&original, &task).await? {
            tracing::info!(task = %task.name, "task is up to date");
            let mut permit = None;
            self.run_hooks(&task, &call, &task.hooks.on_skipped, "on_skipped", &mut permit)
                .await;
            return Ok(());
        }

        let mut permit = self.acquire_permit().await;
        self.run_hooks(&task, &call, &task.hooks.before_all, "before_all", &mut permit)
            .await;

        let result = self.run_cmds(&task, &call, &mut permit).await;

        match &result {
            Ok(()) => {
                self.run_hooks(&task, &call, &task.hooks.on_success, "on_success", &mut permit)
                    .await
            }
            Err(_) => {
                self.run_hooks(&task, &call, &task.hooks.on_failure, "on_failure", &mut permit)
                    .await
            }
        }
        self.run_hooks(&task, &call, &task.hooks.after_all, "after_all", &mut permit)
            .await;
        drop(permit);

        match result {
            Ok(()) => {
                self.record_success(&original, &task).await?;
                Ok(())
            }
            Err(err) => {
                self.fingerprint.record_failure(&task).await;
                Err(err)
            }
        }
    }

    /// Resolve a call to its task, by exact name or a single-wildcard match
    fn resolve(&self, call: &Call) -> Result<(Task, Call)> {
        if let Some(task) = self.tasks.get(&call.task) {
            return Ok((task.clone(), call.clone()));
        }

        let mut matches: Vec<(&String, &Task, String)> = self
            .tasks
            .iter()
            .filter_map(|(name, task)| {
                wildcard_match(name, &call.task).map(|capture| (name, task, capture))
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));

        match matches.as_slice() {
            [] => Err(RunError::TaskNotFound(call.task.clone()).into()),
            [(_, task, capture)] => {
                let mut call = call.clone();
                call.vars.set_value("MATCH", capture.clone());
                Ok(((*task).clone(), call))
            }
            many => {
                let names: Vec<&str> = many.iter().map(|(name, _, _)| name.as_str()).collect();
                Err(RunError::AmbiguousWildcardMatch {
                    call: call.task.clone(),
                    matches: names.join(", "),
                }
                .into())
            }
        }
    }

    fn bump_call_count(&self, name: &str) -> Result<()> {
        let mut counts = self.call_counts.lock().expect("call counter poisoned");
        let count = counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count > MAX_CALLS_PER_TASK {
            return Err(RunError::CalledTooManyTimes {
                task: name.to_string(),
                limit: MAX_CALLS_PER_TASK,
            }
            .into());
        }
        Ok(())
    }

    /// Enforce `requires` before anything executes
    fn check_requires(&self, task: &Task) -> Result<()> {
        for required in &task.requires {
            let Some(var) = task.vars.get(&required.name) else {
                return Err(RunError::RequiredVariableMissing {
                    task: task.name.clone(),
                    var: required.name.clone(),
                }
                .into());
            };
            if let (Some(allowed), Some(value)) = (&required.allowed, var.as_str()) {
                if !allowed.iter().any(|candidate| candidate == value) {
                    return Err(RunError::NotAllowedValue {
                        task: task.name.clone(),
                        var: required.name.clone(),
                        value: value.to_string(),
                        allowed: allowed.join(", "),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    async fn check_preconditions(&self, task: &Task) -> Result<()> {
        let dir = task.directory(self.compiler.root_dir());
        let env = task.env_pairs();
        for precondition in &task.preconditions {
            let request = RunRequest::new(&precondition.sh, &dir).with_env(env.clone());
            let output = self
                .wait_cancellable(&task.name, self.executor.capture(&request))
                .await?;
            if !output.status.success() {
                return Err(RunError::PreconditionFailed {
                    task: task.name.clone(),
                    message: precondition.message(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn is_up_to_date(&self, original: &Task, compiled: &Task) -> Result<bool> {
        if !self.fingerprint.is_up_to_date(compiled).await? {
            return Ok(false);
        }
        if let Some(checker) = &self.definition {
            if !checker.is_unchanged(original)? {
                tracing::debug!(task = %compiled.name, "task definition changed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn record_success(&self, original: &Task, compiled: &Task) -> Result<()> {
        self.fingerprint.record_success(compiled).await?;
        if let Some(checker) = &self.definition {
            checker.record(original)?;
        }
        Ok(())
    }

    /// Run the command list: deferred commands are collected as encountered
    /// and always run after the main list, in declared order
    async fn run_cmds(&self, task: &Task, call: &Call, permit: &mut Permit) -> Result<()> {
        let mut deferred = Vec::new();
        let mut result = Ok(());

        for cmd in &task.cmds {
            if cmd.is_deferred() {
                deferred.push(cmd);
                continue;
            }
            match self.run_cmd(task, call, cmd, permit).await {
                Ok(()) => {}
                Err(err) if cmd.is_ignore_error() && !err.is_interrupted() => {
                    tracing::debug!(task = %task.name, error = %err, "command failed (ignored)");
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        for cmd in deferred {
            if let Err(err) = self.run_cmd(task, call, cmd, permit).await {
                tracing::warn!(task = %task.name, error = %err, "deferred command failed");
            }
        }

        result
    }

    async fn run_cmd(&self, task: &Task, call: &Call, cmd: &Cmd, permit: &mut Permit) -> Result<()> {
        if let Some((name, vars)) = cmd.task_call() {
            let nested = Call {
                task: name.to_string(),
                vars: vars.clone(),
                silent: call.silent || cmd.is_silent(),
                direct: false,
            };
            // Release the gate while the nested task runs; it acquires its
            // own permit. Holding on here would deadlock at a limit of 1.
            permit.take();
            let result = self.run_call(nested).await;
            *permit = self.acquire_permit().await;
            return result;
        }

        let Some(command) = cmd.command() else {
            return Ok(());
        };
        if command.is_empty() {
            return Ok(());
        }

        if !(task.silent || call.silent || cmd.is_silent()) {
            tracing::info!(task = %task.name, "+ {}", command);
        }

        let request = RunRequest::new(command, task.directory(self.compiler.root_dir()))
            .with_env(task.env_pairs());
        let status = self
            .wait_cancellable(&task.name, self.executor.run(&request))
            .await?;
        if !status.success() {
            return Err(RunError::CommandFailed {
                task: task.name.clone(),
                command: command.to_string(),
                code: status.code(),
            }
            .into());
        }
        Ok(())
    }

    /// Best-effort hook execution: failures are logged, never escalated
    async fn run_hooks(
        &self,
        task: &Task,
        call: &Call,
        cmds: &[Cmd],
        stage: &str,
        permit: &mut Permit,
    ) {
        for cmd in cmds {
            if let Err(err) = self.run_cmd(task, call, cmd, permit).await {
                tracing::warn!(task = %task.name, stage, error = %err, "hook command failed");
            }
        }
    }

    async fn acquire_permit(&self) -> Permit {
        match &self.semaphore {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("concurrency gate closed"),
            ),
            None => None,
        }
    }

    /// Await a command, aborting (and killing the spawned process, via drop)
    /// if the run is interrupted
    async fn wait_cancellable<T>(
        &self,
        task: &str,
        operation: impl Future<Output = io::Result<T>>,
    ) -> Result<T> {
        let mut cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return Err(RunError::Interrupted(task.to_string()).into());
        }
        tokio::select! {
            result = operation => Ok(result?),
            _ = cancel.changed() => Err(RunError::Interrupted(task.to_string()).into()),
        }
    }
}

/// Match a call name against a task name containing exactly one `*`
///
/// Returns the text the wildcard captured.
fn wildcard_match(pattern: &str, name: &str) -> Option<String> {
    let (prefix, suffix) = pattern.split_once('*')?;
    if suffix.contains('*') {
        return None;
    }
    if name.len() >= prefix.len() + suffix.len()
        && name.starts_with(prefix)
        && name.ends_with(suffix)
    {
        Some(name[prefix.len()..name.len() - suffix.len()].to_string())
    } else {
        None
    }
}
