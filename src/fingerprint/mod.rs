//! Up-to-date decisions and persisted fingerprint state
//!
//! Two independent checks feed the verdict: the status probes and the
//! sources check selected by the task's method. With neither configured a
//! task is never up to date. With both, the task is up to date only if both
//! agree. State lives under a temp directory, keyed by a filesystem-safe
//! normalization of the task name, and is written only after successful
//! runs.

pub mod checksum;
pub mod definition;
pub mod glob;
pub mod status;
pub mod timestamp;

pub use definition::DefinitionChecker;

use crate::error::{FingerprintError, Result};
use crate::runner::{CommandRunner, ShellRunner};
use crate::taskfile::{Method, Task};
use checksum::ChecksumChecker;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timestamp::TimestampChecker;
use tokio::sync::Mutex;

/// Decides whether tasks are up to date and persists their state
pub struct Fingerprint {
    temp_dir: PathBuf,
    root_dir: PathBuf,
    executor: Arc<dyn CommandRunner>,

    /// Serializes state-file access and holds decision-time digests
    state: Mutex<HashMap<String, String>>,
}

impl Fingerprint {
    /// Create an engine persisting state under `temp_dir`, for tasks rooted
    /// at `root_dir`
    pub fn new(temp_dir: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        Fingerprint {
            temp_dir: temp_dir.into(),
            root_dir: root_dir.into(),
            executor: Arc::new(ShellRunner::new()),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Use a custom command runner for status probes
    pub fn with_executor(mut self, executor: Arc<dyn CommandRunner>) -> Self {
        self.executor = executor;
        self
    }

    /// The directory fingerprint state lives under
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// A definition-change checker sharing this engine's state directory
    pub fn definition_checker(&self) -> DefinitionChecker {
        DefinitionChecker::new(&self.temp_dir)
    }

    /// Whether the task may be skipped
    pub async fn is_up_to_date(&self, task: &Task) -> Result<bool> {
        let status_defined = !task.status.is_empty();
        let sources_defined = !task.sources.is_empty();
        if !status_defined && !sources_defined {
            return Ok(false);
        }

        let status = if status_defined {
            let dir = task.directory(&self.root_dir);
            let env = task.env_pairs();
            Some(status::all_pass(self.executor.as_ref(), task, &dir, &env).await)
        } else {
            None
        };

        let sources = if sources_defined {
            Some(self.sources_up_to_date(task).await?)
        } else {
            None
        };

        Ok(combine(status, sources))
    }

    /// Persist new state after a successful run
    ///
    /// Write failures are hard errors: the run succeeded, but skipping is
    /// now broken and the caller must hear about it.
    pub async fn record_success(&self, task: &Task) -> Result<()> {
        if task.sources.is_empty() {
            return Ok(());
        }
        let dir = task.directory(&self.root_dir);
        let mut state = self.state.lock().await;
        match task.method {
            Method::Checksum => {
                let decision = state.remove(&task.name);
                ChecksumChecker::new(&self.temp_dir).record_success(
                    task,
                    &dir,
                    decision.as_deref(),
                )?;
            }
            Method::Timestamp => {
                TimestampChecker::new(&self.temp_dir).record_success(task)?;
            }
            Method::None => {}
        }
        Ok(())
    }

    /// Invalidate persisted state after a failed run
    pub async fn record_failure(&self, task: &Task) {
        let mut state = self.state.lock().await;
        state.remove(&task.name);
        if task.method == Method::Checksum {
            ChecksumChecker::new(&self.temp_dir).invalidate(task);
        }
    }

    async fn sources_up_to_date(&self, task: &Task) -> Result<bool> {
        let dir = task.directory(&self.root_dir);
        let mut state = self.state.lock().await;
        match task.method {
            Method::Checksum => {
                match ChecksumChecker::new(&self.temp_dir).check(task, &dir) {
                    Ok(verdict) => {
                        state.insert(task.name.clone(), verdict.sources_digest);
                        Ok(verdict.up_to_date)
                    }
                    // Unreadable inputs: safer to re-run than to skip.
                    Err(FingerprintError::Hash { path, source }) => {
                        tracing::warn!(
                            task = %task.name,
                            path = %path.display(),
                            error = %source,
                            "could not hash input; assuming not up to date"
                        );
                        Ok(false)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Method::Timestamp => Ok(TimestampChecker::new(&self.temp_dir).check(task, &dir)?),
            Method::None => Ok(false),
        }
    }
}

/// Combine the two check results into one verdict
fn combine(status: Option<bool>, sources: Option<bool>) -> bool {
    match (status, sources) {
        (None, None) => false,
        (Some(status), None) => status,
        (None, Some(sources)) => sources,
        (Some(status), Some(sources)) => status && sources,
    }
}

/// Map a task name to a filesystem-safe state file name
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_combine_truth_table() {
        assert!(!combine(None, None));
        assert!(combine(Some(true), None));
        assert!(!combine(Some(false), None));
        assert!(combine(None, Some(true)));
        assert!(!combine(None, Some(false)));
        assert!(combine(Some(true), Some(true)));
        assert!(!combine(Some(true), Some(false)));
        assert!(!combine(Some(false), Some(true)));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("build"), "build");
        assert_eq!(normalize_name("build:web/v2"), "build-web-v2");
        assert_eq!(normalize_name("a b.c"), "a-b-c");
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xff, 0x0a]), "00ff0a");
    }

    #[tokio::test]
    async fn test_no_status_no_sources_never_up_to_date() {
        let temp = TempDir::new().unwrap();
        let engine = Fingerprint::new(temp.path(), ".");
        let task = Task {
            name: "plain".to_string(),
            ..Task::default()
        };
        assert!(!engine.is_up_to_date(&task).await.unwrap());
        assert!(!engine.is_up_to_date(&task).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_only_governs() {
        let temp = TempDir::new().unwrap();
        let engine =
            Fingerprint::new(temp.path(), ".").with_executor(Arc::new(ShellRunner::new()));

        let passing = Task {
            name: "done".to_string(),
            status: vec!["true".to_string()],
            ..Task::default()
        };
        assert!(engine.is_up_to_date(&passing).await.unwrap());

        let failing = Task {
            name: "todo".to_string(),
            status: vec!["false".to_string()],
            ..Task::default()
        };
        assert!(!engine.is_up_to_date(&failing).await.unwrap());
    }

    #[tokio::test]
    async fn test_method_none_with_sources_never_up_to_date() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.txt"), "x").unwrap();

        let engine = Fingerprint::new(temp.path(), work.path());
        let task = Task {
            name: "always".to_string(),
            sources: vec!["*.txt".to_string()],
            method: Method::None,
            ..Task::default()
        };
        assert!(!engine.is_up_to_date(&task).await.unwrap());
        engine.record_success(&task).await.unwrap();
        assert!(!engine.is_up_to_date(&task).await.unwrap());
    }

    #[tokio::test]
    async fn test_checksum_round_trip() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("in.txt"), "v1").unwrap();

        let engine = Fingerprint::new(temp.path(), work.path());
        let task = Task {
            name: "gen".to_string(),
            sources: vec!["in.txt".to_string()],
            ..Task::default()
        };

        assert!(!engine.is_up_to_date(&task).await.unwrap());
        engine.record_success(&task).await.unwrap();
        assert!(engine.is_up_to_date(&task).await.unwrap());

        fs::write(work.path().join("in.txt"), "v2").unwrap();
        assert!(!engine.is_up_to_date(&task).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_failure_invalidates_checksum() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("in.txt"), "v1").unwrap();

        let engine = Fingerprint::new(temp.path(), work.path());
        let task = Task {
            name: "gen".to_string(),
            sources: vec!["in.txt".to_string()],
            ..Task::default()
        };

        engine.is_up_to_date(&task).await.unwrap();
        engine.record_success(&task).await.unwrap();
        assert!(engine.is_up_to_date(&task).await.unwrap());

        engine.record_failure(&task).await;
        assert!(!engine.is_up_to_date(&task).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_and_sources_both_must_agree() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("in.txt"), "v1").unwrap();

        let engine = Fingerprint::new(temp.path(), work.path());
        let task = Task {
            name: "gen".to_string(),
            sources: vec!["in.txt".to_string()],
            status: vec!["false".to_string()],
            ..Task::default()
        };

        engine.is_up_to_date(&task).await.unwrap();
        engine.record_success(&task).await.unwrap();
        // Sources agree, but the failing status probe vetoes the skip.
        assert!(!engine.is_up_to_date(&task).await.unwrap());
    }
}
