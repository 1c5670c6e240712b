//! Retry orchestration: classification, backoff and the attempt loop.

mod backoff;
mod classifier;
mod observer;
mod orchestrator;

pub use backoff::Backoff;
pub use classifier::{DEFAULT_TRANSIENT_SIGNATURES, FailureClass, TransientClassifier};
pub use observer::ExecutionObserver;
pub use orchestrator::{AttemptRunner, RetryAttempt, RetryOrchestrator, RetryPolicy};
