//! Sandbox configuration, loadable from TOML.
//!
//! ```toml
//! [execution]
//! mode = "process"
//! interpreter = "freecadcmd"
//! timeout_ms = 60000
//!
//! [retry]
//! max_attempts = 3
//!
//! [policy]
//! mode = "strict"
//! allow = ["numpy"]
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::{IsolationMode, WrapperKind};
use crate::output::markers::DEFAULT_BENIGN_STDERR;
use crate::retry::DEFAULT_TRANSIENT_SIGNATURES;
use crate::validate::{PolicyMode, default_reduced_trust_allow};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub execution: ExecutionConfig,
    pub retry: RetryConfig,
    pub policy: PolicyConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub mode: IsolationMode,
    /// Interpreter for process mode.
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub wrapper: WrapperKind,
    /// Per-attempt deadline.
    pub timeout_ms: u64,
    /// Working directory of every attempt. Defaults to the system temp dir.
    pub working_dir: Option<PathBuf>,
    /// Where rendered scripts are written. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub max_concurrent: usize,
    /// Per-stream stdout/stderr capture limit.
    pub max_output_bytes: usize,
    /// Environment variables passed through to interpreters.
    pub inherit_env: Vec<String>,
    /// Host bridge command for shared-host mode.
    pub host_command: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::Process,
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-u".to_string()],
            wrapper: WrapperKind::Python,
            timeout_ms: 30_000,
            working_dir: None,
            scratch_dir: None,
            max_concurrent: 4,
            max_output_bytes: 1024 * 1024,
            inherit_env: ["PATH", "HOME", "LANG", "LC_ALL", "TMPDIR", "PYTHONPATH"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            host_command: vec!["python3".to_string(), "-u".to_string()],
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Working directory, falling back to the system temp dir.
    pub fn effective_working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Upper bound on attempts per run. 0 behaves like 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub backoff_unit_ms: u64,
    pub max_delay_ms: Option<u64>,
    /// Case-insensitive error substrings that mark a failure as transient.
    pub transient_signatures: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit_ms: 1000,
            max_delay_ms: Some(30_000),
            transient_signatures: DEFAULT_TRANSIENT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    /// Start from the built-in allow/block tables.
    pub extend_defaults: bool,
    pub allow: Vec<String>,
    pub block: Vec<String>,
    /// Treat `__x__` attributes without an explicit entry as blocked.
    pub block_dunder_attributes: bool,
    /// Treat `_x` attributes and from-imports without an explicit entry as blocked.
    pub block_private_attributes: bool,
    /// Allowed names that survive in shared-host mode.
    pub reduced_trust_allow: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Strict,
            extend_defaults: true,
            allow: Vec::new(),
            block: Vec::new(),
            block_dunder_attributes: true,
            block_private_attributes: true,
            reduced_trust_allow: default_reduced_trust_allow(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Stderr substrings that never count as errors.
    pub benign_stderr: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            benign_stderr: DEFAULT_BENIGN_STDERR.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SandboxConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SandboxConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// `$CONFIG_DIR/forgebox/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("forgebox").join("config.toml"))
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => {
                tracing::debug!(path = %default.display(), "loading config");
                Self::load(&default)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let execution = &self.execution;
        if execution.timeout_ms == 0 {
            return Err(Error::Config("execution.timeout_ms must be positive".to_string()));
        }
        if execution.max_concurrent == 0 {
            return Err(Error::Config(
                "execution.max_concurrent must be at least 1".to_string(),
            ));
        }
        if execution.max_output_bytes == 0 {
            return Err(Error::Config(
                "execution.max_output_bytes must be positive".to_string(),
            ));
        }
        match execution.mode {
            IsolationMode::Process if execution.interpreter.trim().is_empty() => {
                return Err(Error::Config(
                    "execution.interpreter must not be empty".to_string(),
                ));
            }
            IsolationMode::SharedHost if execution.host_command.is_empty() => {
                return Err(Error::Config(
                    "execution.host_command must not be empty in shared_host mode".to_string(),
                ));
            }
            _ => {}
        }
        if self
            .retry
            .max_delay_ms
            .is_some_and(|max| max < self.retry.backoff_unit_ms)
        {
            return Err(Error::Config(
                "retry.max_delay_ms must not be below retry.backoff_unit_ms".to_string(),
            ));
        }
        Ok(())
    }
}
