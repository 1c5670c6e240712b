//! Error types for forgebox-core.
//!
//! These errors are plumbing. Anything that happens while a script is being
//! executed is converted into an [`ExecutionResult`](crate::ExecutionResult)
//! at the component boundary and never reaches the caller of
//! [`Sandbox::run`](crate::Sandbox::run).

use std::path::PathBuf;

use thiserror::Error;

use crate::validate::SyntaxError;

/// Result type for forgebox-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in forgebox-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Script could not be tokenized or parsed.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// Invalid policy table.
    #[error("policy error: {0}")]
    Policy(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to read a configuration file.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interpreter or host binary could not be located.
    #[error("interpreter not found: {0}")]
    Interpreter(String),

    /// Failed to spawn a child process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// IPC communication error with the shared host process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Render the error with a recovery hint for terminal users.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Interpreter(_) => Some(
                "set [execution].interpreter to an absolute path or make sure it is on PATH",
            ),
            Error::Spawn { .. } => Some("check that the interpreter is executable"),
            Error::Config(_) | Error::ConfigRead { .. } | Error::Toml(_) => {
                Some("run `forgebox policy` to inspect the effective configuration")
            }
            Error::Ipc(_) => Some(
                "the shared host process exited unexpectedly; check [execution].host_command",
            ),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
