//! The sandbox facade: validate, wait for a slot, then orchestrate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::execute::{Executor, HostExecutor, IsolationMode, ProcessExecutor, ProcessPool};
use crate::output::OutputParser;
use crate::result::{ExecutionResult, ExecutionStatus, ValidationResult};
use crate::retry::{AttemptRunner, ExecutionObserver, RetryOrchestrator, RetryPolicy};
use crate::script::Script;
use crate::validate::{Policy, Validator};

/// Executor followed by output parsing, in a fixed working directory.
///
/// With a pool attached, each attempt holds one slot while it executes.
/// Backoff sleeps between attempts hold none.
pub struct SandboxRunner {
    executor: Box<dyn Executor>,
    parser: OutputParser,
    working_dir: PathBuf,
    pool: Option<ProcessPool>,
}

impl SandboxRunner {
    pub fn new(executor: Box<dyn Executor>, parser: OutputParser, working_dir: PathBuf) -> Self {
        Self {
            executor,
            parser,
            working_dir,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: ProcessPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl AttemptRunner for SandboxRunner {
    fn run_attempt(&self, script: &Script, timeout: Duration) -> ExecutionResult {
        let queued = Instant::now();
        let _permit = self.pool.as_ref().map(ProcessPool::acquire);
        let queue_wait = queued.elapsed();
        if self.pool.is_some() {
            debug!(
                script_id = %script.id(),
                queue_wait_ms = queue_wait.as_millis() as u64,
                "acquired execution slot"
            );
        }

        let provisional = self.executor.execute(script, &self.working_dir, timeout);
        let mut result = self.parser.apply(provisional);
        if self.pool.is_some() {
            result.insert_metadata("queue_wait_ms", queue_wait.as_millis() as u64);
        }
        result
    }
}

/// What [`Sandbox::run`] produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Validation failed; nothing was executed.
    Rejected(ValidationResult),
    /// At least one attempt ran.
    Completed(ExecutionResult),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(result) if result.is_success())
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Outcome::Rejected(_) => ExecutionStatus::ValidationFailed,
            Outcome::Completed(result) => result.status(),
        }
    }

    /// Collapse into one result type. A rejection becomes `ValidationFailed`.
    pub fn into_execution_result(self) -> ExecutionResult {
        match self {
            Outcome::Rejected(validation) => ExecutionResult::validation_failed(&validation),
            Outcome::Completed(result) => result,
        }
    }
}

/// Per-call overrides for [`Sandbox::run_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

/// Validates, executes and retries scripts under one configuration.
///
/// `run` blocks the calling thread. A `Sandbox` can be shared across
/// threads behind an `Arc`; concurrent attempts are capped by its pool.
pub struct Sandbox {
    config: SandboxConfig,
    validator: Validator,
    orchestrator: RetryOrchestrator<SandboxRunner>,
    pool: ProcessPool,
}

impl Sandbox {
    /// Build a sandbox with the executor the config asks for.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let policy = policy_for(&config, config.execution.mode)?;
        let executor: Box<dyn Executor> = match config.execution.mode {
            IsolationMode::Process => Box::new(ProcessExecutor::from_config(&config.execution)),
            IsolationMode::SharedHost => Box::new(HostExecutor::from_config(
                &config.execution,
                policy.allowed_names(),
            )),
        };
        Self::assemble(config, policy, executor)
    }

    /// Build a sandbox around a caller-supplied executor.
    ///
    /// The policy is narrowed when the executor reports shared-host isolation.
    pub fn with_executor(config: SandboxConfig, executor: impl Executor + 'static) -> Result<Self> {
        let policy = policy_for(&config, executor.isolation())?;
        Self::assemble(config, policy, Box::new(executor))
    }

    fn assemble(config: SandboxConfig, policy: Policy, executor: Box<dyn Executor>) -> Result<Self> {
        config.validate()?;
        let pool = ProcessPool::new(config.execution.max_concurrent)?;
        let isolation = executor.isolation();
        let runner = SandboxRunner::new(
            executor,
            OutputParser::new(config.output.benign_stderr.clone()),
            config.execution.effective_working_dir(),
        )
        .with_pool(pool.clone());
        let orchestrator = RetryOrchestrator::new(runner, RetryPolicy::from_config(&config.retry));

        info!(
            isolation = %isolation,
            policy_mode = ?policy.mode(),
            max_concurrent = config.execution.max_concurrent,
            "sandbox ready"
        );
        Ok(Self {
            config,
            validator: Validator::new(policy),
            orchestrator,
            pool,
        })
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.orchestrator.set_observer(observer);
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The policy scripts are validated against.
    pub fn policy(&self) -> &Policy {
        self.validator.policy()
    }

    pub fn isolation(&self) -> IsolationMode {
        self.orchestrator.runner().executor().isolation()
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    pub fn validate(&self, script: &Script) -> ValidationResult {
        self.validator.validate(script)
    }

    /// Validate and, if valid, execute with the configured timeout and
    /// attempt limit.
    pub fn run(&self, script: &Script) -> Outcome {
        self.run_with(script, RunOptions::default())
    }

    pub fn run_with(&self, script: &Script, options: RunOptions) -> Outcome {
        let validation = self.validator.validate(script);
        if !validation.is_valid() {
            info!(
                script_id = %script.id(),
                errors = validation.errors().len(),
                "script rejected"
            );
            return Outcome::Rejected(validation);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.execution.timeout());
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.retry.max_attempts);

        let mut result = self.orchestrator.run(script, max_attempts, timeout);
        result.insert_metadata("script_id", script.id().to_string());
        Outcome::Completed(result)
    }
}

fn policy_for(config: &SandboxConfig, isolation: IsolationMode) -> Result<Policy> {
    let policy = Policy::from_config(&config.policy)?;
    Ok(match isolation {
        IsolationMode::Process => policy,
        IsolationMode::SharedHost => policy.restricted_to(&config.policy.reduced_trust_allow),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned `(stdout, exit_code)` pairs.
    struct Scripted {
        replies: Mutex<VecDeque<(&'static str, i32)>>,
        calls: AtomicU32,
        last_timeout: Mutex<Option<Duration>>,
        isolation: IsolationMode,
    }

    impl Scripted {
        fn new(replies: &[(&'static str, i32)]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().copied().collect()),
                calls: AtomicU32::new(0),
                last_timeout: Mutex::new(None),
                isolation: IsolationMode::Process,
            }
        }
    }

    impl Executor for Arc<Scripted> {
        fn execute(&self, _script: &Script, _dir: &Path, timeout: Duration) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_timeout.lock().unwrap() = Some(timeout);
            let (stdout, code) = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(("EXECUTION_SUCCESS\n", 0));
            let mut result = ExecutionResult::new(if code == 0 {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::ExecutionFailed
            });
            result.output = stdout.to_string();
            result.exit_code = Some(code);
            result
        }

        fn isolation(&self) -> IsolationMode {
            self.isolation
        }
    }

    fn fast_config() -> SandboxConfig {
        let mut config = SandboxConfig::default();
        config.retry.backoff_unit_ms = 1;
        config.retry.max_delay_ms = Some(5);
        config
    }

    #[test]
    fn test_sandbox_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Sandbox>();
    }

    #[test]
    fn test_rejected_scripts_never_execute() {
        let executor = Arc::new(Scripted::new(&[]));
        let sandbox = Sandbox::with_executor(fast_config(), executor.clone()).unwrap();

        let outcome = sandbox.run(&Script::new("import os\nos.system('true')\n"));

        assert_eq!(outcome.status(), ExecutionStatus::ValidationFailed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        match outcome {
            Outcome::Rejected(validation) => {
                assert!(validation.errors().iter().any(|e| e.contains("'os'")));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_completed_run_is_stamped() {
        let executor = Arc::new(Scripted::new(&[("ENTITY_CREATED: Box001\nEXECUTION_SUCCESS\n", 0)]));
        let sandbox = Sandbox::with_executor(fast_config(), executor.clone()).unwrap();
        let script = Script::new("import FreeCAD\nFreeCAD.newDocument('d')\n");

        let outcome = sandbox.run(&script);
        assert!(outcome.is_success());
        let result = outcome.into_execution_result();
        assert_eq!(result.created_entities, vec!["Box001"]);
        assert_eq!(result.metadata["script_id"], script.id().to_string());
        assert_eq!(result.metadata["retries"], 1);
        assert!(result.metadata.contains_key("queue_wait_ms"));
        assert_eq!(sandbox.pool().available(), sandbox.pool().capacity());
    }

    #[test]
    fn test_run_with_overrides_limits() {
        let executor = Arc::new(Scripted::new(&[
            ("ERROR: Recompute failed\n", 1),
            ("ERROR: Recompute failed\n", 1),
            ("ERROR: Recompute failed\n", 1),
        ]));
        let sandbox = Sandbox::with_executor(fast_config(), executor.clone()).unwrap();

        let outcome = sandbox.run_with(
            &Script::new("x = 1"),
            RunOptions {
                timeout: Some(Duration::from_millis(1234)),
                max_attempts: Some(2),
            },
        );

        assert_eq!(outcome.status(), ExecutionStatus::ExecutionFailed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *executor.last_timeout.lock().unwrap(),
            Some(Duration::from_millis(1234))
        );
    }

    #[test]
    fn test_slot_is_free_during_backoff() {
        let mut config = fast_config();
        config.execution.max_concurrent = 1;
        config.retry.backoff_unit_ms = 400;
        config.retry.max_delay_ms = None;
        let executor = Arc::new(Scripted::new(&[("ERROR: Recompute failed\n", 1)]));
        let sandbox = Arc::new(Sandbox::with_executor(config, executor.clone()).unwrap());

        let runner = {
            let sandbox = Arc::clone(&sandbox);
            std::thread::spawn(move || sandbox.run(&Script::new("x = 1")))
        };

        let deadline = Instant::now() + Duration::from_millis(300);
        let mut borrowed = None;
        while borrowed.is_none() && Instant::now() < deadline {
            if executor.calls.load(Ordering::SeqCst) == 1 {
                borrowed = sandbox.pool().try_acquire();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(borrowed.is_some(), "slot stayed held after the first attempt");
        drop(borrowed);

        let result = runner.join().unwrap().into_execution_result();
        assert!(result.is_success());
        assert_eq!(result.metadata["retries"], 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sandbox.pool().available(), 1);
    }

    #[test]
    fn test_shared_host_narrows_policy() {
        let mut scripted = Scripted::new(&[]);
        scripted.isolation = IsolationMode::SharedHost;
        let sandbox = Sandbox::with_executor(fast_config(), Arc::new(scripted)).unwrap();

        assert_eq!(sandbox.isolation(), IsolationMode::SharedHost);
        assert!(sandbox.validate(&Script::new("import math\nprint(math.pi)\n")).is_valid());
        let narrowed = sandbox.validate(&Script::new("import json\n"));
        assert!(!narrowed.is_valid());
        assert!(narrowed.errors()[0].contains("unknown module 'json'"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SandboxConfig::default();
        config.execution.max_concurrent = 0;
        assert!(Sandbox::new(config).is_err());
    }

    #[test]
    fn test_rejection_converts_to_validation_failed() {
        let validation = ValidationResult::rejected("line 1: blocked call 'eval'");
        let result = Outcome::Rejected(validation).into_execution_result();
        assert_eq!(result.status(), ExecutionStatus::ValidationFailed);
        assert!(!result.is_success());
        assert_eq!(result.error, "line 1: blocked call 'eval'");
    }
}
