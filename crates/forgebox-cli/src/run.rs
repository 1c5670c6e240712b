//! Run command implementation for Forgebox CLI.
//!
//! Validates a script, executes it under the configured isolation mode and
//! prints the final result.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use forgebox_core::{
    ExecutionResult, IsolationMode, Outcome, Sandbox, SandboxConfig, Script, ScriptContext,
    WrapperKind,
};
use serde_json::Value;

use crate::colors;
use crate::progress::ProgressObserver;
use crate::validate::{print_report, read_script};

/// Flags of `forgebox run` that override the loaded config.
pub struct RunArgs {
    pub context: Vec<String>,
    pub context_file: Option<PathBuf>,
    pub timeout: Option<f64>,
    pub max_attempts: Option<u32>,
    pub mode: Option<IsolationMode>,
    pub interpreter: Option<String>,
    pub passthrough: bool,
    pub json: bool,
}

/// Run a script file. Exits with 1 on rejection or failure.
pub fn execute(
    mut config: SandboxConfig,
    script_path: &Path,
    args: RunArgs,
) -> anyhow::Result<ExitCode> {
    let start = Instant::now();

    apply_overrides(&mut config, &args)?;
    let context = build_context(args.context_file.as_deref(), &args.context)?;
    let script = Script::with_context(read_script(script_path)?, context);

    let mut sandbox = Sandbox::new(config)?;
    if !args.json {
        println!(
            "{}Running{} {} {}({} isolation){}",
            colors::BOLD,
            colors::RESET,
            script_path.display(),
            colors::DIM,
            sandbox.isolation(),
            colors::RESET
        );
        sandbox.set_observer(Arc::new(ProgressObserver));
    }

    let outcome = sandbox.run(&script);
    let success = outcome.is_success();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match &outcome {
            Outcome::Rejected(validation) => print_report(script_path, validation),
            Outcome::Completed(result) => print_result(result, start),
        }
    }

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(config: &mut SandboxConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(secs) = args.timeout {
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("--timeout must be a positive number of seconds, got {secs}");
        }
        config.execution.timeout_ms = ((secs * 1000.0).round() as u64).max(1);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(mode) = args.mode {
        config.execution.mode = mode;
    }
    if let Some(interpreter) = &args.interpreter {
        config.execution.interpreter = interpreter.clone();
        config.execution.interpreter_args.clear();
    }
    if args.passthrough {
        config.execution.wrapper = WrapperKind::Passthrough;
    }
    Ok(())
}

/// Merge the context file with `key=value` pairs; pairs win.
fn build_context(file: Option<&Path>, pairs: &[String]) -> anyhow::Result<ScriptContext> {
    let mut context = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
            match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => map,
                _ => anyhow::bail!("{} must contain a JSON object", path.display()),
            }
        }
        None => ScriptContext::new(),
    };

    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid --context '{pair}', expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid --context '{pair}', key is empty");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }

    Ok(context)
}

fn print_result(result: &ExecutionResult, start: Instant) {
    if !result.output.is_empty() {
        println!("\n{}Output:{}", colors::BOLD, colors::RESET);
        println!("{}", "─".repeat(50));
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
        println!("{}", "─".repeat(50));
    }

    if !result.created_entities.is_empty() {
        println!(
            "{}Created:{} {}",
            colors::BOLD,
            colors::RESET,
            result.created_entities.join(", ")
        );
    }

    let attempts = result
        .metadata
        .get("retries")
        .and_then(Value::as_u64)
        .unwrap_or(1);

    if result.is_success() {
        println!(
            "{}Completed{} in {:.2}s ({} attempt{})",
            colors::GREEN,
            colors::RESET,
            start.elapsed().as_secs_f64(),
            attempts,
            if attempts == 1 { "" } else { "s" }
        );
    } else {
        eprintln!(
            "{}Failed{} ({}): {}",
            colors::RED,
            colors::RESET,
            result.status(),
            result.error
        );
    }
}
