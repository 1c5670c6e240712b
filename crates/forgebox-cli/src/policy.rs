//! Policy command: dump the policy a sandbox would enforce.

use std::process::ExitCode;

use forgebox_core::{Sandbox, SandboxConfig};

/// Print the effective policy as JSON.
///
/// In shared-host mode this is the narrowed reduced-trust table.
pub fn execute(config: SandboxConfig) -> anyhow::Result<ExitCode> {
    let sandbox = Sandbox::new(config)?;
    println!("{}", serde_json::to_string_pretty(sandbox.policy())?);
    Ok(ExitCode::SUCCESS)
}
