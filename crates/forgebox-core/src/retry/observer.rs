//! Hooks for progress reporting during orchestrated runs.

use std::time::Duration;

use crate::result::ExecutionResult;
use crate::script::Script;

/// Callback trait for attempt progress reporting.
pub trait ExecutionObserver: Send + Sync {
    /// Called before each attempt. `attempt` is 1-based.
    fn on_attempt_started(&self, script: &Script, attempt: u32, max_attempts: u32);

    /// Called with the parsed result of each attempt.
    fn on_attempt_finished(&self, script: &Script, attempt: u32, result: &ExecutionResult);

    /// Called when a transient failure will be retried after `delay`.
    fn on_retry_scheduled(&self, _script: &Script, _attempt: u32, _delay: Duration, _reason: &str) {
    }
}
