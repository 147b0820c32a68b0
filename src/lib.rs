//! Rask - a declarative task execution engine
//!
//! Rask takes a set of named tasks with commands, dependencies, variables and
//! change-detection rules, decides which tasks must run and in what order,
//! and skips work that is already up to date. Parsing of task definition
//! documents, CLI handling and output styling live in front-end crates; this
//! crate is the engine they drive.

// Public modules
pub mod compiler;
pub mod error;
pub mod fingerprint;
pub mod runner;
pub mod taskfile;

// Re-export commonly used types
pub use compiler::Compiler;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use runner::{CommandRunner, Runner, ShellRunner};
pub use taskfile::{Call, Task, Tasks, Var, Vars};

/// Current version of Rask
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
