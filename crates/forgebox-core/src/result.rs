//! Structured results returned by validation and execution.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered metadata attached to an [`ExecutionResult`].
pub type Metadata = BTreeMap<String, Value>;

/// Outcome of statically validating a script.
///
/// `valid` is true exactly when `errors` is empty. Values are only built
/// through [`ValidationResult::builder`], which keeps the two in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    allowed_symbols: Vec<String>,
    blocked_symbols: Vec<String>,
}

impl ValidationResult {
    pub fn builder() -> ValidationResultBuilder {
        ValidationResultBuilder::default()
    }

    /// A rejection carrying a single error.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self::builder().error(error).build()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Allowed symbols the script referenced, sorted.
    pub fn allowed_symbols(&self) -> &[String] {
        &self.allowed_symbols
    }

    /// Blocked symbols the script referenced, sorted.
    pub fn blocked_symbols(&self) -> &[String] {
        &self.blocked_symbols
    }
}

/// Accumulates findings while a script is walked.
#[derive(Debug, Default)]
pub struct ValidationResultBuilder {
    errors: Vec<String>,
    warnings: Vec<String>,
    allowed: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

impl ValidationResultBuilder {
    /// Record an error. Repeats of an identical message are dropped.
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.push_error(message);
        self
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    pub fn record_allowed(&mut self, symbol: impl Into<String>) {
        self.allowed.insert(symbol.into());
    }

    pub fn record_blocked(&mut self, symbol: impl Into<String>) {
        self.blocked.insert(symbol.into());
    }

    pub fn build(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            allowed_symbols: self.allowed.into_iter().collect(),
            blocked_symbols: self.blocked.into_iter().collect(),
        }
    }
}

/// Terminal classification of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    ValidationFailed,
    ExecutionFailed,
    Timeout,
    UnknownError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::ValidationFailed => "validation_failed",
            ExecutionStatus::ExecutionFailed => "execution_failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of running a script.
///
/// `success` always mirrors `status == Success`; both are private and only
/// change through [`ExecutionResult::set_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ExecutionResultRepr")]
pub struct ExecutionResult {
    success: bool,
    status: ExecutionStatus,
    /// Captured standard output.
    pub output: String,
    /// Human-readable failure description, empty on success.
    pub error: String,
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,
    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,
    pub created_entities: Vec<String>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            success: status == ExecutionStatus::Success,
            status,
            output: String::new(),
            error: String::new(),
            execution_time: Duration::ZERO,
            exit_code: None,
            created_entities: Vec::new(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    /// Result for an attempt that hit its deadline.
    pub fn timeout(limit: Duration, elapsed: Duration) -> Self {
        let mut result = Self::new(ExecutionStatus::Timeout);
        result.error = format!("execution timed out after {:.3}s", limit.as_secs_f64());
        result.execution_time = elapsed;
        result
    }

    /// Result for an infrastructure failure outside the script's control.
    pub fn unknown_error(message: impl Into<String>) -> Self {
        let mut result = Self::new(ExecutionStatus::UnknownError);
        result.error = message.into();
        result
    }

    /// Result standing in for a rejected validation.
    pub fn validation_failed(validation: &ValidationResult) -> Self {
        let mut result = Self::new(ExecutionStatus::ValidationFailed);
        result.error = validation.errors().join("\n");
        result
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.success = status == ExecutionStatus::Success;
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }
}

#[derive(Deserialize)]
struct ExecutionResultRepr {
    status: ExecutionStatus,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
    #[serde(with = "duration_secs", default)]
    execution_time: Duration,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    created_entities: Vec<String>,
    #[serde(default)]
    metadata: Metadata,
    timestamp: DateTime<Utc>,
}

impl From<ExecutionResultRepr> for ExecutionResult {
    fn from(repr: ExecutionResultRepr) -> Self {
        Self {
            success: repr.status == ExecutionStatus::Success,
            status: repr.status,
            output: repr.output,
            error: repr.error,
            execution_time: repr.execution_time,
            exit_code: repr.exit_code,
            created_entities: repr.created_entities,
            metadata: repr.metadata,
            timestamp: repr.timestamp,
        }
    }
}

/// Serialize a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
