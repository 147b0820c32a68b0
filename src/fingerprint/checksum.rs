//! Checksum-based sources check
//!
//! Hashes the source and generate sets into one digest each and compares the
//! pair against the digests persisted after the last successful run.

use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{glob, normalize_name, to_hex};
use crate::taskfile::Task;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Decision-time digests for one check
pub struct ChecksumVerdict {
    pub up_to_date: bool,

    /// Sources digest captured at decision time, compared again before
    /// persisting so a mid-run source change discards the state instead
    pub sources_digest: String,
}

pub struct ChecksumChecker {
    state_dir: PathBuf,
}

impl ChecksumChecker {
    pub fn new(temp_dir: &Path) -> Self {
        ChecksumChecker {
            state_dir: temp_dir.join("checksum"),
        }
    }

    fn state_path(&self, task: &Task) -> PathBuf {
        self.state_dir.join(normalize_name(&task.name))
    }

    /// Compare current digests against the persisted pair
    pub fn check(&self, task: &Task, dir: &Path) -> FingerprintResult<ChecksumVerdict> {
        let sources_digest = digest_set(dir, &task.sources)?;
        let generates_digest = digest_set(dir, &task.generates)?;

        // A missing or unreadable state file means "not up to date".
        let previous = match fs::read_to_string(self.state_path(task)) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::debug!(task = %task.name, error = %err, "no previous checksum");
                String::new()
            }
        };
        let mut lines = previous.lines();
        let up_to_date = lines.next() == Some(sources_digest.as_str())
            && lines.next() == Some(generates_digest.as_str());

        Ok(ChecksumVerdict {
            up_to_date,
            sources_digest,
        })
    }

    /// Persist the digest pair after a successful run
    ///
    /// If the sources changed between the up-to-date decision and now, the
    /// stale state file is discarded instead, forcing a re-check next time.
    pub fn record_success(
        &self,
        task: &Task,
        dir: &Path,
        decision_digest: Option<&str>,
    ) -> FingerprintResult<()> {
        let sources_digest = digest_set(dir, &task.sources)?;
        let generates_digest = digest_set(dir, &task.generates)?;

        if let Some(decision) = decision_digest {
            if decision != sources_digest {
                tracing::debug!(task = %task.name, "sources changed mid-run; discarding checksum");
                self.invalidate(task);
                return Ok(());
            }
        }

        let path = self.state_path(task);
        fs::create_dir_all(&self.state_dir).map_err(|source| FingerprintError::Write {
            path: self.state_dir.clone(),
            source,
        })?;
        fs::write(&path, format!("{sources_digest}\n{generates_digest}\n")).map_err(|source| {
            FingerprintError::Write { path, source }
        })
    }

    /// Remove persisted state so the next check re-evaluates from scratch
    pub fn invalidate(&self, task: &Task) {
        let path = self.state_path(task);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(task = %task.name, error = %err, "failed to remove checksum state");
            }
        }
    }
}

/// Hash a glob set into one digest
///
/// Each file contributes its task-relative path and either its content or,
/// for a symbolic link, the link target text.
fn digest_set(dir: &Path, patterns: &[String]) -> FingerprintResult<String> {
    let files = glob::expand(dir, patterns)?;
    let mut hasher = Sha256::new();

    for path in files {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());

        let metadata = fs::symlink_metadata(&path).map_err(|source| FingerprintError::Hash {
            path: path.clone(),
            source,
        })?;
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path).map_err(|source| FingerprintError::Hash {
                path: path.clone(),
                source,
            })?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let mut file = fs::File::open(&path).map_err(|source| FingerprintError::Hash {
                path: path.clone(),
                source,
            })?;
            let mut buffer = [0u8; 8192];
            loop {
                let read = file.read(&mut buffer).map_err(|source| FingerprintError::Hash {
                    path: path.clone(),
                    source,
                })?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
        }
    }

    Ok(to_hex(hasher.finalize().as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn checksum_task(name: &str) -> Task {
        Task {
            name: name.to_string(),
            sources: vec!["*.src".to_string()],
            generates: vec!["*.out".to_string()],
            ..Task::default()
        }
    }

    #[test]
    fn test_first_check_is_not_up_to_date() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "input").unwrap();

        let checker = ChecksumChecker::new(temp.path());
        let verdict = checker.check(&checksum_task("build"), work.path()).unwrap();
        assert!(!verdict.up_to_date);
    }

    #[test]
    fn test_unchanged_files_are_up_to_date_after_record() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "input").unwrap();
        fs::write(work.path().join("a.out"), "output").unwrap();

        let task = checksum_task("build");
        let checker = ChecksumChecker::new(temp.path());
        checker.record_success(&task, work.path(), None).unwrap();

        let verdict = checker.check(&task, work.path()).unwrap();
        assert!(verdict.up_to_date);
    }

    #[test]
    fn test_single_byte_change_is_detected() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "input").unwrap();

        let task = checksum_task("build");
        let checker = ChecksumChecker::new(temp.path());
        checker.record_success(&task, work.path(), None).unwrap();

        fs::write(work.path().join("a.src"), "inpuT").unwrap();
        let verdict = checker.check(&task, work.path()).unwrap();
        assert!(!verdict.up_to_date);
    }

    #[test]
    fn test_mid_run_source_change_discards_state() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "input").unwrap();

        let task = checksum_task("build");
        let checker = ChecksumChecker::new(temp.path());
        let verdict = checker.check(&task, work.path()).unwrap();

        // Source mutated between the decision and the record.
        fs::write(work.path().join("a.src"), "changed").unwrap();
        checker
            .record_success(&task, work.path(), Some(&verdict.sources_digest))
            .unwrap();

        assert!(!checker.state_dir.join("build").exists());
    }

    #[test]
    fn test_invalidate_removes_state() {
        let temp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "input").unwrap();

        let task = checksum_task("build");
        let checker = ChecksumChecker::new(temp.path());
        checker.record_success(&task, work.path(), None).unwrap();
        assert!(checker.state_dir.join("build").exists());

        checker.invalidate(&task);
        assert!(!checker.state_dir.join("build").exists());
    }

    #[test]
    fn test_path_rename_changes_digest() {
        let work = TempDir::new().unwrap();
        fs::write(work.path().join("a.src"), "same").unwrap();
        let before = digest_set(work.path(), &["*.src".to_string()]).unwrap();

        fs::rename(work.path().join("a.src"), work.path().join("b.src")).unwrap();
        let after = digest_set(work.path(), &["*.src".to_string()]).unwrap();
        assert_ne!(before, after);
    }
}
