//! Timestamp-based sources check
//!
//! Compares the newest modification time among the sources against the
//! newest among the generates plus a marker file touched on every check.

use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{glob, normalize_name};
use crate::taskfile::Task;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub struct TimestampChecker {
    state_dir: PathBuf,
}

impl TimestampChecker {
    pub fn new(temp_dir: &Path) -> Self {
        TimestampChecker {
            state_dir: temp_dir.join("timestamp"),
        }
    }

    fn marker_path(&self, task: &Task) -> PathBuf {
        self.state_dir.join(normalize_name(&task.name))
    }

    pub fn check(&self, task: &Task, dir: &Path) -> FingerprintResult<bool> {
        let marker = self.marker_path(task);

        if !marker.exists() {
            self.touch(&marker)?;
            return Ok(false);
        }

        let marker_mtime = match fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(err) => {
                tracing::debug!(task = %task.name, error = %err, "unreadable timestamp marker");
                return Ok(false);
            }
        };

        let sources = glob::expand(dir, &task.sources)?;
        let generates = glob::expand(dir, &task.generates)?;

        let Some(newest_source) = newest_mtime(&sources) else {
            // No source files to compare against; stay on the safe side.
            self.touch(&marker)?;
            return Ok(false);
        };
        let newest_generate = newest_mtime(&generates)
            .map(|mtime| mtime.max(marker_mtime))
            .unwrap_or(marker_mtime);

        self.touch(&marker)?;
        Ok(newest_source <= newest_generate)
    }

    /// Touch the marker after a successful run
    pub fn record_success(&self, task: &Task) -> FingerprintResult<()> {
        self.touch(&self.marker_path(task))
    }

    fn touch(&self, marker: &Path) -> FingerprintResult<()> {
        fs::create_dir_all(&self.state_dir).map_err(|source| FingerprintError::Write {
            path: self.state_dir.clone(),
            source,
        })?;
        fs::write(marker, b"").map_err(|source| FingerprintError::Write {
            path: marker.to_path_buf(),
            source,
        })
    }
}

fn newest_mtime(files: &[PathBuf]) -> Option<SystemTime> {
    files
        .iter()
        .filter_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
        .max()
}
