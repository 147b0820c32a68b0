//! Definition-change check
//!
//! Keeps a marker file named after the task and a hash of its serialized
//! definition. When the definition changes, no marker exists for the new
//! hash and the task is considered out of date even if its files are not.

use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{normalize_name, to_hex};
use crate::taskfile::Task;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub struct DefinitionChecker {
    state_dir: PathBuf,
}

impl DefinitionChecker {
    pub fn new(temp_dir: &Path) -> Self {
        DefinitionChecker {
            state_dir: temp_dir.join("definition"),
        }
    }

    fn marker_path(&self, task: &Task) -> FingerprintResult<PathBuf> {
        let bytes = serde_json::to_vec(task)?;
        let digest = to_hex(Sha256::digest(&bytes).as_slice());
        Ok(self
            .state_dir
            .join(format!("{}-{}", normalize_name(&task.name), &digest[..16])))
    }

    /// Whether the task's definition matches the recorded one
    pub fn is_unchanged(&self, task: &Task) -> FingerprintResult<bool> {
        Ok(self.marker_path(task)?.exists())
    }

    /// Record the current definition, dropping markers for older ones
    pub fn record(&self, task: &Task) -> FingerprintResult<()> {
        let marker = self.marker_path(task)?;
        let prefix = format!("{}-", normalize_name(&task.name));

        if let Ok(entries) = fs::read_dir(&self.state_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(&prefix) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        fs::create_dir_all(&self.state_dir).map_err(|source| FingerprintError::Write {
            path: self.state_dir.clone(),
            source,
        })?;
        fs::write(&marker, b"").map_err(|source| FingerprintError::Write {
            path: marker.clone(),
            source,
        })
    }
}
