//! Glob expansion for source and generate sets
//!
//! Patterns resolve relative to the task directory. A leading `!` negates a
//! pattern: files matched by any negated pattern are excluded from the set.

use crate::error::{FingerprintError, FingerprintResult};
use globset::{Glob, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Expand patterns into a sorted, deduplicated list of files
pub fn expand(base: &Path, patterns: &[String]) -> FingerprintResult<Vec<PathBuf>> {
    let mut includes = Vec::new();
    let mut excludes = GlobSetBuilder::new();
    let mut has_excludes = false;

    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => {
                let glob = Glob::new(negated).map_err(|err| FingerprintError::Pattern {
                    pattern: pattern.clone(),
                    cause: err.to_string(),
                })?;
                excludes.add(glob);
                has_excludes = true;
            }
            None => includes.push(pattern),
        }
    }

    let excludes = excludes.build().map_err(|err| FingerprintError::Pattern {
        pattern: patterns.join(", "),
        cause: err.to_string(),
    })?;

    let mut files = Vec::new();
    for pattern in includes {
        let full = base.join(pattern).to_string_lossy().into_owned();
        let entries = glob::glob(&full).map_err(|err| FingerprintError::Pattern {
            pattern: pattern.clone(),
            cause: err.to_string(),
        })?;
        for entry in entries {
            let path = entry.map_err(|err| FingerprintError::Pattern {
                pattern: pattern.clone(),
                cause: err.to_string(),
            })?;
            if path.is_dir() {
                continue;
            }
            if has_excludes {
                let relative = path.strip_prefix(base).unwrap_or(&path);
                if excludes.is_match(relative) {
                    continue;
                }
            }
            files.push(path);
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}
