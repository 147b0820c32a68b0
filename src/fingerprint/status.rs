//! Status-command check
//!
//! A task with `status` probes is status-up-to-date only if every probe
//! exits zero. A failing probe is not an error; it just means the task has
//! work to do.

use crate::runner::{CommandRunner, RunRequest};
use crate::taskfile::Task;
use std::path::Path;

pub async fn all_pass(
    executor: &dyn CommandRunner,
    task: &Task,
    dir: &Path,
    env: &[(String, String)],
) -> bool {
    for probe in &task.status {
        let request = RunRequest::new(probe, dir).with_env(env.to_vec());
        match executor.capture(&request).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                tracing::debug!(
                    task = %task.name,
                    probe,
                    code = ?output.status.code(),
                    "status probe failed"
                );
                return false;
            }
            Err(err) => {
                tracing::debug!(task = %task.name, probe, error = %err, "status probe error");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ShellRunner;

    fn status_task(probes: &[&str]) -> Task {
        Task {
            name: "probed".to_string(),
            status: probes.iter().map(|p| p.to_string()).collect(),
            ..Task::default()
        }
    }

    #[tokio::test]
    async fn test_all_probes_pass() {
        let runner = ShellRunner::new();
        let task = status_task(&["true", "true"]);
        assert!(all_pass(&runner, &task, Path::new("."), &[]).await);
    }

    #[tokio::test]
    async fn test_one_failing_probe_short_circuits() {
        let runner = ShellRunner::new();
        let task = status_task(&["true", "false", "true"]);
        assert!(!all_pass(&runner, &task, Path::new("."), &[]).await);
    }
}
