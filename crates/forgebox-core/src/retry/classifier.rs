//! Transient-versus-permanent failure classification.

use serde::{Deserialize, Serialize};

use crate::result::{ExecutionResult, ExecutionStatus};

/// Error signatures that indicate a failure worth retrying.
pub const DEFAULT_TRANSIENT_SIGNATURES: &[&str] = &[
    "recompute failed",
    "failed to recompute",
    "recompute error",
    "document recompute",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Likely to succeed if run again.
    Transient,
    /// A real defect, or a failure that must not be masked by retries.
    Permanent,
}

/// Matches failed results against case-insensitive signatures.
///
/// Only `ExecutionFailed` results can be transient. Timeouts, validation
/// failures and infrastructure errors are always permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientClassifier {
    signatures: Vec<String>,
}

impl Default for TransientClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_SIGNATURES.iter().copied())
    }
}

impl TransientClassifier {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            signatures: signatures
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    /// `None` for successful results.
    pub fn classify(&self, result: &ExecutionResult) -> Option<FailureClass> {
        match result.status() {
            ExecutionStatus::Success => None,
            ExecutionStatus::ExecutionFailed if self.matches(result) => {
                Some(FailureClass::Transient)
            }
            _ => Some(FailureClass::Permanent),
        }
    }

    pub fn is_transient(&self, result: &ExecutionResult) -> bool {
        self.classify(result) == Some(FailureClass::Transient)
    }

    /// Looks at the parsed error and raw stderr only. Plain stdout is script
    /// chatter and never decides a retry.
    fn matches(&self, result: &ExecutionResult) -> bool {
        let stderr = result
            .metadata
            .get("stderr")
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        [result.error.as_str(), stderr]
            .iter()
            .map(|text| text.to_lowercase())
            .any(|text| self.signatures.iter().any(|sig| text.contains(sig.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn failed(error: &str) -> ExecutionResult {
        let mut result = ExecutionResult::new(ExecutionStatus::ExecutionFailed);
        result.error = error.to_string();
        result
    }

    #[test]
    fn test_recompute_failures_are_transient() {
        let classifier = TransientClassifier::default();
        assert!(classifier.is_transient(&failed("Recompute failed: Pad001")));
        assert!(classifier.is_transient(&failed("RuntimeError: Document recompute aborted")));
    }

    #[test]
    fn test_other_failures_are_permanent() {
        let classifier = TransientClassifier::default();
        assert_eq!(
            classifier.classify(&failed("NameError: name 'x' is not defined")),
            Some(FailureClass::Permanent)
        );
    }

    #[test]
    fn test_status_gates_classification() {
        let classifier = TransientClassifier::default();

        let mut timeout = ExecutionResult::timeout(Duration::from_secs(1), Duration::from_secs(1));
        timeout.output = "ERROR: Recompute failed".to_string();
        assert_eq!(classifier.classify(&timeout), Some(FailureClass::Permanent));

        let unknown = ExecutionResult::unknown_error("recompute failed while spawning");
        assert!(!classifier.is_transient(&unknown));

        assert_eq!(
            classifier.classify(&ExecutionResult::new(ExecutionStatus::Success)),
            None
        );
    }

    #[test]
    fn test_signature_found_in_stderr_metadata() {
        let classifier = TransientClassifier::default();
        let mut result = failed("process exited with status 1");
        result.insert_metadata("stderr", "FreeCAD: failed to recompute document");
        assert!(classifier.is_transient(&result));
    }

    #[test]
    fn test_stdout_chatter_is_ignored() {
        let classifier = TransientClassifier::default();
        let mut result = failed("NameError: name 'Boxx' is not defined");
        result.output = "starting document recompute step\n".to_string();
        assert_eq!(classifier.classify(&result), Some(FailureClass::Permanent));
    }

    #[test]
    fn test_custom_signatures_are_case_insensitive() {
        let classifier = TransientClassifier::new(["  Solver Busy ", ""]);
        assert_eq!(classifier.signatures(), ["solver busy"]);
        assert!(classifier.is_transient(&failed("SOLVER BUSY, try later")));
        assert!(!classifier.is_transient(&failed("Recompute failed")));
    }
}
