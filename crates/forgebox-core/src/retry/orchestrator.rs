//! Bounded retry loop over attempt runners.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::classifier::TransientClassifier;
use super::observer::ExecutionObserver;
use crate::config::RetryConfig;
use crate::result::{ExecutionResult, ExecutionStatus};
use crate::script::Script;

/// Runs a single attempt of a script and returns its parsed result.
pub trait AttemptRunner: Send + Sync {
    fn run_attempt(&self, script: &Script, timeout: Duration) -> ExecutionResult;
}

impl<F> AttemptRunner for F
where
    F: Fn(&Script, Duration) -> ExecutionResult + Send + Sync,
{
    fn run_attempt(&self, script: &Script, timeout: Duration) -> ExecutionResult {
        self(script, timeout)
    }
}

/// One entry of a run's attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based.
    pub attempt_number: u32,
    /// Time slept before this attempt started.
    #[serde(with = "crate::result::duration_secs")]
    pub delay_before: Duration,
    pub resulting_status: ExecutionStatus,
}

/// How failures are classified and how long to wait between attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    pub classifier: TransientClassifier,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_unit_ms),
                config.max_delay_ms.map(Duration::from_millis),
            ),
            classifier: TransientClassifier::new(&config.transient_signatures),
        }
    }
}

/// Retries transient failures with exponential backoff.
///
/// Each run moves through `Attempting -> Succeeded`, `Attempting ->
/// Retrying -> Attempting` or `Attempting -> ExhaustedFailure`. Only the
/// last attempt's result is returned, with `retries`, `attempts` and (for
/// failures) `last_error` folded into its metadata.
pub struct RetryOrchestrator<R> {
    runner: R,
    policy: RetryPolicy,
    observer: Option<Arc<dyn ExecutionObserver>>,
}

impl<R: AttemptRunner> RetryOrchestrator<R> {
    pub fn new(runner: R, policy: RetryPolicy) -> Self {
        Self {
            runner,
            policy,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observer = Some(observer);
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `script` until it succeeds, fails permanently or uses up
    /// `max_attempts` (0 counts as 1).
    pub fn run(&self, script: &Script, max_attempts: u32, timeout: Duration) -> ExecutionResult {
        self.run_with_history(script, max_attempts, timeout).0
    }

    /// Like [`run`](Self::run), also returning the attempt history.
    pub fn run_with_history(
        &self,
        script: &Script,
        max_attempts: u32,
        timeout: Duration,
    ) -> (ExecutionResult, Vec<RetryAttempt>) {
        let max_attempts = max_attempts.max(1);
        let mut history: Vec<RetryAttempt> = Vec::new();
        let mut delay_before = Duration::ZERO;
        let mut attempt: u32 = 1;

        loop {
            if let Some(observer) = &self.observer {
                observer.on_attempt_started(script, attempt, max_attempts);
            }
            debug!(script_id = %script.id(), attempt, max_attempts, "starting attempt");

            let result = self.runner.run_attempt(script, timeout);
            history.push(RetryAttempt {
                attempt_number: attempt,
                delay_before,
                resulting_status: result.status(),
            });
            if let Some(observer) = &self.observer {
                observer.on_attempt_finished(script, attempt, &result);
            }

            if attempt < max_attempts && self.policy.classifier.is_transient(&result) {
                delay_before = self.policy.backoff.delay_for(attempt);
                warn!(
                    script_id = %script.id(),
                    attempt,
                    delay_ms = delay_before.as_millis() as u64,
                    error = %result.error,
                    "transient failure, retrying"
                );
                if let Some(observer) = &self.observer {
                    observer.on_retry_scheduled(script, attempt, delay_before, &result.error);
                }
                thread::sleep(delay_before);
                attempt += 1;
                continue;
            }

            let result = finish(result, attempt, &history);
            info!(
                script_id = %script.id(),
                status = %result.status(),
                retries = attempt,
                "execution finished"
            );
            return (result, history);
        }
    }
}

fn finish(mut result: ExecutionResult, attempts: u32, history: &[RetryAttempt]) -> ExecutionResult {
    result.insert_metadata("retries", attempts);
    result.insert_metadata(
        "attempts",
        serde_json::to_value(history).unwrap_or_default(),
    );
    if !result.is_success() {
        let last_error = result.error.clone();
        result.insert_metadata("last_error", last_error);
    }
    result
}
