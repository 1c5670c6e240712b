//! Validate command implementation for Forgebox CLI.

use std::path::Path;
use std::process::ExitCode;

use forgebox_core::{PolicyMode, Sandbox, SandboxConfig, Script, ValidationResult};

use crate::colors;

/// Validate a script file. Exits with 1 when it would be rejected.
pub fn execute(
    mut config: SandboxConfig,
    script_path: &Path,
    permissive: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if permissive {
        config.policy.mode = PolicyMode::Permissive;
    }
    let sandbox = Sandbox::new(config)?;
    let script = Script::new(read_script(script_path)?);
    let validation = sandbox.validate(&script);

    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
    } else {
        print_report(script_path, &validation);
    }

    Ok(if validation.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn read_script(path: &Path) -> anyhow::Result<String> {
    if !path.is_file() {
        anyhow::bail!("Script not found: {}", path.display());
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Print errors and warnings, then a one-line verdict.
pub fn print_report(script_path: &Path, validation: &ValidationResult) {
    for error in validation.errors() {
        println!("{}error:{} {}", colors::RED, colors::RESET, error);
    }
    for warning in validation.warnings() {
        println!("{}warning:{} {}", colors::YELLOW, colors::RESET, warning);
    }

    if validation.is_valid() {
        println!(
            "{}✓{} {} passed validation",
            colors::GREEN,
            colors::RESET,
            script_path.display()
        );
    } else {
        println!(
            "{}✗{} {} rejected ({} error{})",
            colors::RED,
            colors::RESET,
            script_path.display(),
            validation.errors().len(),
            if validation.errors().len() == 1 { "" } else { "s" }
        );
    }
}
