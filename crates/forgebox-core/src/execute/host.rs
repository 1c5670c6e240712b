//! Reduced-trust executor backed by one long-lived host process.
//!
//! Some CAD hosts keep their document model inside the interpreter, so a
//! fresh process per attempt loses all state. This executor keeps a single
//! host bridge alive and ships scripts to it over IPC. Scripts share that
//! process, which is why the sandbox pairs this mode with a narrowed policy.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Executor, IsolationMode};
use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::ipc::{HostCommand, HostKillHandle, HostResponse, HostSession};
use crate::result::{ExecutionResult, ExecutionStatus};
use crate::script::Script;

/// Runs scripts inside a shared host bridge.
///
/// Executions are serialized: the host runs one script at a time. A timed
/// out or broken host is killed and a new one is spawned on the next call.
pub struct HostExecutor {
    host_command: Vec<String>,
    allowed_names: Vec<String>,
    session: Mutex<Option<HostSession>>,
    /// Kill handle of the host currently running a script.
    /// Separate from `session` so it can be reached while that lock is held.
    current_kill: Mutex<Option<HostKillHandle>>,
}

impl HostExecutor {
    /// `allowed_names` are the builtins and modules the host namespace exposes.
    pub fn new(host_command: Vec<String>, allowed_names: Vec<String>) -> Self {
        Self {
            host_command,
            allowed_names,
            session: Mutex::new(None),
            current_kill: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ExecutionConfig, allowed_names: Vec<String>) -> Self {
        Self::new(config.host_command.clone(), allowed_names)
    }

    pub fn allowed_names(&self) -> &[String] {
        &self.allowed_names
    }

    /// Kill the host if it is running a script right now.
    ///
    /// The interrupted attempt comes back as an `UnknownError`.
    pub fn kill_current(&self) {
        if let Some(handle) = lock(&self.current_kill).as_ref() {
            handle.kill();
        }
    }

    fn run(
        &self,
        script: &Script,
        working_dir: &Path,
        timeout: Duration,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let mut slot = lock(&self.session);

        let needs_spawn = match slot.as_mut() {
            Some(session) => !session.is_alive(),
            None => true,
        };
        if needs_spawn {
            *slot = Some(HostSession::spawn(&self.host_command)?);
        }
        let session = slot
            .as_mut()
            .ok_or_else(|| Error::Ipc("Host session unavailable".to_string()))?;
        let pid = session.pid();
        let kill_handle = session.kill_handle();
        *lock(&self.current_kill) = Some(kill_handle.clone());

        let id = script.id().to_string();
        let response = session
            .send_command(&HostCommand::Execute {
                id: id.clone(),
                source: script.source().to_string(),
                context: script.context().clone(),
                working_dir: working_dir.display().to_string(),
                allowed_names: self.allowed_names.clone(),
            })
            .and_then(|()| session.recv_response(timeout));
        *lock(&self.current_kill) = None;

        let mut result = match response {
            Ok(Some(HostResponse::Finished {
                id: finished,
                stdout,
                stderr,
                exit_code,
            })) if finished == id => {
                let mut result = ExecutionResult::new(if exit_code == 0 {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::ExecutionFailed
                });
                result.output = stdout;
                result.error = stderr;
                result.exit_code = Some(exit_code);
                result.execution_time = started.elapsed();
                result
            }
            Ok(None) => {
                warn!(script_id = %id, pid, ?timeout, "host attempt timed out, killing host");
                kill_handle.kill();
                *slot = None;
                ExecutionResult::timeout(timeout, started.elapsed())
            }
            Ok(Some(HostResponse::Fatal { message })) => {
                *slot = None;
                return Err(Error::Ipc(format!("Host failed: {}", message)));
            }
            Ok(Some(other)) => {
                *slot = None;
                return Err(Error::Ipc(format!(
                    "Unexpected response when executing: {:?}",
                    other
                )));
            }
            Err(e) => {
                *slot = None;
                return Err(e);
            }
        };

        result.insert_metadata("pid", pid);
        debug!(script_id = %id, pid, status = %result.status(), "host attempt finished");
        Ok(result)
    }
}

impl Executor for HostExecutor {
    fn execute(&self, script: &Script, working_dir: &Path, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let mut result = match self.run(script, working_dir, timeout, started) {
            Ok(result) => result,
            Err(e) => {
                warn!(script_id = %script.id(), error = %e, "shared host failure");
                let mut result = ExecutionResult::unknown_error(e.to_string());
                result.execution_time = started.elapsed();
                result
            }
        };
        result.insert_metadata("isolation", IsolationMode::SharedHost.as_str());
        result.insert_metadata("reduced_trust", true);
        result
    }

    fn isolation(&self) -> IsolationMode {
        IsolationMode::SharedHost
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
