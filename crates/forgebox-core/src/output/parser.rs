//! Parsing of marker-protocol output into structured fields.

use serde_json::json;

use super::markers::{DEFAULT_BENIGN_STDERR, ENTITY_CREATED, ERROR, EXECUTION_SUCCESS, WARNING};
use crate::result::{ExecutionResult, ExecutionStatus};

/// Structured view of one attempt's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutcome {
    pub created_entities: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub completion_signal_seen: bool,
}

impl ParsedOutcome {
    /// Success requires a clean exit, the completion marker and no errors.
    pub fn success(&self, exit_code: Option<i32>) -> bool {
        exit_code == Some(0) && self.completion_signal_seen && self.errors.is_empty()
    }

    /// The most specific reason the attempt failed, if it did.
    pub fn failure_reason(&self, exit_code: Option<i32>) -> Option<String> {
        if let Some(first) = self.errors.first() {
            return Some(first.clone());
        }
        match exit_code {
            Some(0) => {}
            Some(code) => return Some(format!("process exited with status {code}")),
            None => return Some("process was terminated by a signal".to_string()),
        }
        if !self.completion_signal_seen {
            return Some(format!(
                "completion marker '{EXECUTION_SUCCESS}' was not emitted"
            ));
        }
        None
    }
}

/// Turns raw stdout/stderr into a [`ParsedOutcome`].
#[derive(Debug, Clone)]
pub struct OutputParser {
    benign_stderr: Vec<String>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new(DEFAULT_BENIGN_STDERR.iter().map(|s| s.to_string()).collect())
    }
}

impl OutputParser {
    /// Create a parser that drops stderr lines containing any of `benign_stderr`.
    pub fn new(benign_stderr: Vec<String>) -> Self {
        Self { benign_stderr }
    }

    pub fn benign_stderr(&self) -> &[String] {
        &self.benign_stderr
    }

    fn is_benign(&self, line: &str) -> bool {
        self.benign_stderr
            .iter()
            .any(|pattern| line.contains(pattern.as_str()))
    }

    pub fn parse(&self, stdout: &str, stderr: &str, _exit_code: Option<i32>) -> ParsedOutcome {
        let mut outcome = ParsedOutcome::default();

        for line in stdout.lines() {
            let line = line.trim_start();
            if let Some(entity) = line.strip_prefix(ENTITY_CREATED) {
                let entity = entity.trim();
                if !entity.is_empty() {
                    outcome.created_entities.push(entity.to_string());
                }
            } else if let Some(message) = line.strip_prefix(ERROR) {
                let message = message.trim();
                outcome.errors.push(if message.is_empty() {
                    "unspecified error".to_string()
                } else {
                    message.to_string()
                });
            } else if let Some(message) = line.strip_prefix(WARNING) {
                outcome.warnings.push(message.trim().to_string());
            } else if line.trim_end() == EXECUTION_SUCCESS {
                outcome.completion_signal_seen = true;
            }
        }

        let mut remaining = Vec::new();
        let mut after_benign = false;
        for line in stderr.lines() {
            if line.trim().is_empty() {
                continue;
            }
            // Python warnings echo the offending source line indented below.
            let continuation = line.starts_with(char::is_whitespace);
            if self.is_benign(line) || (after_benign && continuation) {
                after_benign = true;
                continue;
            }
            after_benign = false;
            remaining.push(line);
        }
        if !remaining.is_empty() {
            outcome.errors.push(format!("stderr: {}", remaining.join("\n")));
        }

        outcome
    }

    /// Refine a provisional executor result with what its output says.
    ///
    /// Timeouts and infrastructure failures pass through untouched. For
    /// other results the executor leaves raw stderr in `error`.
    pub fn apply(&self, mut result: ExecutionResult) -> ExecutionResult {
        if matches!(
            result.status(),
            ExecutionStatus::Timeout | ExecutionStatus::UnknownError | ExecutionStatus::ValidationFailed
        ) {
            return result;
        }

        let stderr = std::mem::take(&mut result.error);
        let parsed = self.parse(&result.output, &stderr, result.exit_code);

        if parsed.success(result.exit_code) {
            result.set_status(ExecutionStatus::Success);
        } else {
            result.set_status(ExecutionStatus::ExecutionFailed);
            result.error = if parsed.errors.is_empty() {
                parsed
                    .failure_reason(result.exit_code)
                    .unwrap_or_else(|| "execution failed".to_string())
            } else {
                parsed.errors.join("\n")
            };
        }

        if !parsed.warnings.is_empty() {
            result.insert_metadata("warnings", json!(parsed.warnings));
        }
        if !stderr.trim().is_empty() {
            result.insert_metadata("stderr", stderr);
        }
        result.created_entities = parsed.created_entities;
        result
    }
}
