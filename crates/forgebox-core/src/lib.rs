//! Core engine for the forgebox script sandbox.
//!
//! This crate provides:
//! - Static validation of untrusted Python scripts against a policy table
//! - Isolated execution in a fresh OS process with a hard timeout
//! - A reduced-trust shared-host mode speaking a framed JSON protocol
//! - Parsing of the marker protocol emitted by the wrapper template
//! - Bounded retries of known-transient failures with exponential backoff
//!
//! Failures are data: [`Sandbox::run`] always returns an [`Outcome`], never an
//! error.

pub mod config;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod output;
pub mod result;
pub mod retry;
pub mod sandbox;
pub mod script;
pub mod validate;

pub use config::{ExecutionConfig, OutputConfig, PolicyConfig, RetryConfig, SandboxConfig};
pub use error::{Error, Result};
pub use execute::{
    Executor, HostExecutor, IsolationMode, PassthroughWrapper, Permit, ProcessConfig,
    ProcessExecutor, ProcessPool, PythonWrapper, ScriptWrapper, WrapperKind,
};
pub use output::{OutputParser, ParsedOutcome};
pub use result::{ExecutionResult, ExecutionStatus, Metadata, ValidationResult};
pub use retry::{
    AttemptRunner, Backoff, ExecutionObserver, FailureClass, RetryAttempt, RetryOrchestrator,
    RetryPolicy, TransientClassifier,
};
pub use sandbox::{Outcome, RunOptions, Sandbox, SandboxRunner};
pub use script::{Script, ScriptContext};
pub use validate::{Decision, Policy, PolicyMode, SyntaxError, Validator};
