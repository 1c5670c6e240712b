//! Isolated execution of validated scripts.
//!
//! Two executors implement [`Executor`]:
//! - [`ProcessExecutor`]: a fresh interpreter process per attempt
//! - [`HostExecutor`]: a long-lived host process driven over IPC, for hosts
//!   whose objects cannot cross a process boundary (reduced trust)

mod host;
mod pool;
mod process;
mod wrapper;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::result::ExecutionResult;
use crate::script::Script;

pub use host::HostExecutor;
pub use pool::{Permit, ProcessPool};
pub use process::{ProcessConfig, ProcessExecutor};
pub use wrapper::{PassthroughWrapper, PythonWrapper, ScriptWrapper, WrapperKind};

/// How strongly an executor separates scripts from each other and the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// One OS process per attempt.
    #[default]
    Process,
    /// Scripts share one host process (reduced trust).
    SharedHost,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Process => "process",
            IsolationMode::SharedHost => "shared_host",
        }
    }
}

impl std::fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one attempt of an already validated script.
///
/// Implementations never re-validate and never fail with `Err`: every
/// problem, including infrastructure trouble, comes back as an
/// [`ExecutionResult`]. Results are provisional until an
/// [`OutputParser`](crate::OutputParser) has looked at the output.
pub trait Executor: Send + Sync {
    fn execute(&self, script: &Script, working_dir: &Path, timeout: Duration) -> ExecutionResult;

    fn isolation(&self) -> IsolationMode;
}
