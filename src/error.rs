//! Error types for Rask

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Rask operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Rask
#[derive(Error, Debug)]
pub enum Error {
    /// Variable compilation errors
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Run(#[from] RunError),

    /// Fingerprint state errors
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Outcome adopted from another in-flight execution of the same call
    #[error("{0}")]
    Shared(Arc<Error>),
}

/// Variable compilation errors
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Dynamic variable command '{command}' failed: {cause}")]
    DynamicVar { command: String, cause: String },
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("Task '{call}' matches more than one wildcard task: {matches}")]
    AmbiguousWildcardMatch { call: String, matches: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Task '{task}' requires variable '{var}' to be set")]
    RequiredVariableMissing { task: String, var: String },

    #[error("Task '{task}' variable '{var}' has value '{value}' but only allows: {allowed}")]
    NotAllowedValue {
        task: String,
        var: String,
        value: String,
        allowed: String,
    },

    #[error("Precondition failed for task '{task}': {message}")]
    PreconditionFailed { task: String, message: String },

    #[error("Task '{0}' is internal and cannot be called directly")]
    InternalTask(String),

    #[error("Task '{task}' was called too many times ({limit}); possible infinite recursion")]
    CalledTooManyTimes { task: String, limit: u32 },

    #[error("Command '{command}' in task '{task}' failed with exit code {code:?}")]
    CommandFailed {
        task: String,
        command: String,
        code: Option<i32>,
    },

    #[error("Task '{0}' was interrupted")]
    Interrupted(String),
}

/// Fingerprint state errors
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Invalid glob pattern '{pattern}': {cause}")]
    Pattern { pattern: String, cause: String },

    #[error("Failed to hash '{path}': {source}")]
    Hash { path: PathBuf, source: io::Error },

    #[error("Failed to write state file '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to serialize task definition: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error (or the shared outcome it wraps) was an interrupt.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Run(RunError::Interrupted(_)) => true,
            Error::Shared(inner) => inner.is_interrupted(),
            _ => false,
        }
    }
}

/// Specialized result type for compilation operations
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Specialized result type for fingerprint operations
pub type FingerprintResult<T> = std::result::Result<T, FingerprintError>;
