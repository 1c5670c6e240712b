//! One interpreter process per attempt.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::wrapper::{PythonWrapper, ScriptWrapper};
use super::{Executor, IsolationMode};
use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::result::{ExecutionResult, ExecutionStatus};
use crate::script::Script;

/// How long pipe readers may keep draining once the process is gone.
///
/// A descendant that left the process group can hold the pipes open for as
/// long as it lives; its output past this point is dropped.
const CAPTURE_GRACE: Duration = Duration::from_millis(500);

/// Settings for [`ProcessExecutor`].
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Interpreter binary, resolved through `PATH` when not absolute.
    pub interpreter: String,
    /// Arguments placed before the script path.
    pub interpreter_args: Vec<String>,
    /// Where rendered scripts are written. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Per-stream capture limit.
    pub max_output_bytes: usize,
    /// Environment variables passed through to the child.
    pub inherit_env: Vec<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ProcessConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            scratch_dir: config.scratch_dir.clone(),
            max_output_bytes: config.max_output_bytes,
            inherit_env: config.inherit_env.clone(),
        }
    }
}

/// Executes each attempt in a fresh OS process.
///
/// The child runs in its own process group with a cleared environment. On
/// timeout the whole group gets SIGKILL, so anything the script forked dies
/// with it.
pub struct ProcessExecutor {
    config: ProcessConfig,
    wrapper: Box<dyn ScriptWrapper>,
}

impl ProcessExecutor {
    /// Create an executor using the Python marker wrapper.
    pub fn new(config: ProcessConfig) -> Self {
        Self::with_wrapper(config, PythonWrapper::new())
    }

    pub fn with_wrapper(config: ProcessConfig, wrapper: impl ScriptWrapper + 'static) -> Self {
        Self {
            config,
            wrapper: Box::new(wrapper),
        }
    }

    /// Build from the `[execution]` config section.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            config: ProcessConfig::from(config),
            wrapper: config.wrapper.build(),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    fn resolve_interpreter(&self) -> Result<PathBuf> {
        which::which(&self.config.interpreter)
            .map_err(|e| Error::Interpreter(format!("{}: {}", self.config.interpreter, e)))
    }

    fn run(
        &self,
        script: &Script,
        working_dir: &Path,
        timeout: Duration,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let program = self.resolve_interpreter()?;
        let rendered = self.wrapper.render(script)?;

        let scratch_dir = self
            .config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let mut file = tempfile::Builder::new()
            .prefix("forgebox-")
            .suffix(self.wrapper.file_suffix())
            .tempfile_in(&scratch_dir)?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(&program);
        command
            .args(&self.config.interpreter_args)
            .arg(file.path())
            .current_dir(working_dir)
            .env_clear();
        for key in &self.config.inherit_env {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command
            .env("FORGEBOX_CONTEXT", script.context_json())
            .env("FORGEBOX_SCRIPT_ID", script.id().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| Error::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);
        let pid = guard.child.id();
        debug!(
            script_id = %script.id(),
            pid,
            interpreter = %program.display(),
            "spawned interpreter"
        );

        let limit = self.config.max_output_bytes;
        let stdout = spawn_capture(guard.child.stdout.take(), limit);
        let stderr = spawn_capture(guard.child.stderr.take(), limit);

        let status = guard.child.wait_timeout(timeout)?;
        let timed_out = status.is_none();
        let status = match status {
            Some(status) => status,
            None => {
                warn!(
                    script_id = %script.id(),
                    pid,
                    ?timeout,
                    "attempt timed out, killing process group"
                );
                guard.kill_group();
                guard.child.wait()?
            }
        };
        guard.reaped = true;
        // Background processes the script left behind would hold the pipes open.
        guard.kill_group();

        let drain_deadline = Instant::now() + CAPTURE_GRACE;
        let stdout = collect(stdout, drain_deadline)?;
        let stderr = collect(stderr, drain_deadline)?;
        if stdout.detached || stderr.detached {
            warn!(
                script_id = %script.id(),
                pid,
                "output pipes still held open after exit, detaching readers"
            );
        }
        let elapsed = started.elapsed();

        let mut result = if timed_out {
            ExecutionResult::timeout(timeout, elapsed)
        } else {
            let mut result = ExecutionResult::new(if status.success() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::ExecutionFailed
            });
            result.error = String::from_utf8_lossy(&stderr.bytes).into_owned();
            result.exit_code = status.code();
            result.execution_time = elapsed;
            result
        };
        result.output = String::from_utf8_lossy(&stdout.bytes).into_owned();
        result.insert_metadata("pid", pid);
        result.insert_metadata("isolation", IsolationMode::Process.as_str());
        if stdout.truncated {
            result.insert_metadata("stdout_truncated", true);
        }
        if stderr.truncated {
            result.insert_metadata("stderr_truncated", true);
        }
        if stdout.detached || stderr.detached {
            result.insert_metadata("output_detached", true);
        }

        debug!(
            script_id = %script.id(),
            pid,
            status = %result.status(),
            exit_code = ?result.exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "interpreter finished"
        );
        Ok(result)
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, script: &Script, working_dir: &Path, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        match self.run(script, working_dir, timeout, started) {
            Ok(result) => result,
            Err(e) => {
                warn!(script_id = %script.id(), error = %e, "execution infrastructure failure");
                let mut result = ExecutionResult::unknown_error(e.to_string());
                result.execution_time = started.elapsed();
                result.insert_metadata("isolation", IsolationMode::Process.as_str());
                result
            }
        }
    }

    fn isolation(&self) -> IsolationMode {
        IsolationMode::Process
    }
}

/// Kills and reaps the child on every exit path.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn kill_group(&mut self) {
        #[cfg(unix)]
        {
            // The child leads its own group, so its pid is the group id.
            unsafe {
                libc::kill(-(self.child.id() as i32), libc::SIGKILL);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
    /// The reader was abandoned before the pipe closed.
    detached: bool,
}

/// A pipe drained on its own thread into a shared buffer.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    done: Receiver<io::Result<()>>,
}

/// Drain a pipe on its own thread, keeping at most `limit` bytes.
fn spawn_capture<R>(pipe: Option<R>, limit: usize) -> Option<Capture>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut stream| {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            let outcome = loop {
                let n = match stream.read(&mut chunk) {
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Err(e),
                };
                let mut captured = lock(&shared);
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            };
            let _ = tx.send(outcome);
        });
        Capture { buffer, done }
    })
}

/// Wait for a reader until `deadline`, then take whatever it has.
fn collect(capture: Option<Capture>, deadline: Instant) -> Result<Captured> {
    let Some(capture) = capture else {
        return Ok(Captured::default());
    };
    let wait = deadline.saturating_duration_since(Instant::now());
    match capture.done.recv_timeout(wait) {
        Ok(Ok(())) => Ok(std::mem::take(&mut *lock(&capture.buffer))),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(RecvTimeoutError::Timeout) => {
            let mut captured = std::mem::take(&mut *lock(&capture.buffer));
            captured.truncated = true;
            captured.detached = true;
            Ok(captured)
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Io(io::Error::other(
            "output capture thread panicked",
        ))),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::PassthroughWrapper;

    fn sh_executor(config: ProcessConfig) -> ProcessExecutor {
        ProcessExecutor::with_wrapper(
            ProcessConfig {
                interpreter: "sh".to_string(),
                interpreter_args: Vec::new(),
                ..config
            },
            PassthroughWrapper::new(".sh"),
        )
    }

    #[test]
    fn test_default_config_uses_python() {
        let config = ProcessConfig::default();
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.interpreter_args, vec!["-u"]);
        assert_eq!(config.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_missing_interpreter_is_unknown_error() {
        let executor = ProcessExecutor::new(ProcessConfig {
            interpreter: "forgebox-no-such-interpreter".to_string(),
            ..ProcessConfig::default()
        });
        let result = executor.execute(
            &Script::new("print(1)"),
            &std::env::temp_dir(),
            Duration::from_secs(5),
        );
        assert_eq!(result.status(), ExecutionStatus::UnknownError);
        assert!(result.error.contains("interpreter not found"));
        assert!(result.exit_code.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn test_captures_output_and_exit_code() {
        let executor = sh_executor(ProcessConfig::default());
        let result = executor.execute(
            &Script::new("echo out; echo err >&2; exit 3"),
            &std::env::temp_dir(),
            Duration::from_secs(10),
        );
        assert_eq!(result.status(), ExecutionStatus::ExecutionFailed);
        assert_eq!(result.output, "out\n");
        assert_eq!(result.error, "err\n");
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.metadata["isolation"], "process");
        assert!(result.metadata.contains_key("pid"));
    }

    #[test]
    #[cfg(unix)]
    fn test_environment_is_cleared() {
        let executor = sh_executor(ProcessConfig {
            inherit_env: vec!["PATH".to_string()],
            ..ProcessConfig::default()
        });
        let mut context = crate::script::ScriptContext::new();
        context.insert("n".to_string(), serde_json::json!(1));
        let script = Script::with_context(
            "echo \"ctx=$FORGEBOX_CONTEXT\"; echo \"home=${HOME:-unset}\"",
            context,
        );
        let result = executor.execute(&script, &std::env::temp_dir(), Duration::from_secs(10));
        assert!(result.is_success(), "{}", result.error);
        assert!(result.output.contains("ctx={\"n\":1}"));
        assert!(result.output.contains("home=unset"));
    }

    #[test]
    #[cfg(unix)]
    fn test_output_is_truncated_at_limit() {
        let executor = sh_executor(ProcessConfig {
            max_output_bytes: 16,
            ..ProcessConfig::default()
        });
        let result = executor.execute(
            &Script::new("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done"),
            &std::env::temp_dir(),
            Duration::from_secs(10),
        );
        assert!(result.is_success());
        assert_eq!(result.output.len(), 16);
        assert_eq!(result.metadata["stdout_truncated"], true);
        assert!(!result.metadata.contains_key("stderr_truncated"));
    }

    #[test]
    #[cfg(unix)]
    fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh_executor(ProcessConfig::default());
        let result = executor.execute(&Script::new("pwd"), dir.path(), Duration::from_secs(10));
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            PathBuf::from(result.output.trim()).canonicalize().unwrap(),
            expected
        );
    }
}
