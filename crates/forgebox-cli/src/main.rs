//! Forgebox CLI - validate and run untrusted CAD scripts.

mod colors;
mod policy;
mod progress;
mod run;
mod validate;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use forgebox_core::{IsolationMode, SandboxConfig};

#[derive(Parser)]
#[command(name = "forgebox")]
#[command(about = "Validate and run untrusted CAD scripts in a sandbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $CONFIG_DIR/forgebox/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate a script without running it
    Validate {
        /// Path to the script
        script: PathBuf,

        /// Report unknown symbols as warnings instead of errors
        #[arg(long)]
        permissive: bool,

        /// Print the validation result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and run a script, retrying transient failures
    Run {
        /// Path to the script
        script: PathBuf,

        /// Context value as key=value (value parsed as JSON when possible)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// JSON object file merged into the context before --context values
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Per-attempt timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,

        /// Maximum number of attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Isolation mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Interpreter binary for process mode (replaces configured arguments)
        #[arg(long, value_name = "BIN")]
        interpreter: Option<String>,

        /// Hand the script to the interpreter without the Python wrapper
        #[arg(long)]
        passthrough: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective policy table as JSON
    Policy,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Process,
    SharedHost,
}

impl From<ModeArg> for IsolationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Process => IsolationMode::Process,
            ModeArg::SharedHost => IsolationMode::SharedHost,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format forgebox-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<forgebox_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let config = SandboxConfig::load_or_default(cli.config.as_deref())
        .map_err(|e| format_error(e.into()))?;

    let code = match cli.command {
        Commands::Validate {
            script,
            permissive,
            json,
        } => validate::execute(config, &script, permissive, json).map_err(format_error)?,

        Commands::Run {
            script,
            context,
            context_file,
            timeout,
            max_attempts,
            mode,
            interpreter,
            passthrough,
            json,
        } => {
            let args = run::RunArgs {
                context,
                context_file,
                timeout,
                max_attempts,
                mode: mode.map(IsolationMode::from),
                interpreter,
                passthrough,
                json,
            };
            run::execute(config, &script, args).map_err(format_error)?
        }

        Commands::Policy => policy::execute(config).map_err(format_error)?,
    };

    Ok(code)
}
