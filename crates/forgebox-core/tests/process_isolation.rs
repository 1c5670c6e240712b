//! Integration tests for process isolation.
//!
//! Scripts are plain `sh` programs run through the passthrough wrapper, so
//! these tests need neither Python nor a CAD host.

#![cfg(unix)]

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use forgebox_core::{
    ExecutionStatus, Executor, PassthroughWrapper, ProcessConfig, ProcessExecutor, Script,
};

fn sh_executor(scratch_dir: Option<&Path>) -> ProcessExecutor {
    ProcessExecutor::with_wrapper(
        ProcessConfig {
            interpreter: "sh".to_string(),
            interpreter_args: Vec::new(),
            scratch_dir: scratch_dir.map(Path::to_path_buf),
            ..ProcessConfig::default()
        },
        PassthroughWrapper::new(".sh"),
    )
}

/// True while `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            let state = stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next());
            !matches!(state, Some("Z") | Some("X"))
        }
        Err(_) => false,
    }
}

fn wait_until_gone(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    check()
}

fn scratch_leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("forgebox-"))
        .collect()
}

// =============================================================================
// Timeouts
// =============================================================================

#[test]
fn test_timeout_kills_the_process() {
    let executor = sh_executor(None);
    let started = Instant::now();

    let result = executor.execute(
        &Script::new("sleep 30\n"),
        &std::env::temp_dir(),
        Duration::from_secs(1),
    );

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert!(!result.is_success());
    assert!(result.exit_code.is_none());
    assert!(result.error.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = result.metadata["pid"].as_u64().unwrap() as i32;
    assert!(
        wait_until_gone(|| unsafe { libc::kill(pid, 0) } != 0),
        "interpreter {pid} still exists after timeout"
    );
}

#[test]
#[cfg(target_os = "linux")]
fn test_timeout_kills_background_children() {
    let executor = sh_executor(None);

    let result = executor.execute(
        &Script::new("sleep 30 &\necho $!\nwait\n"),
        &std::env::temp_dir(),
        Duration::from_secs(1),
    );

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    let grandchild: u32 = result.output.trim().parse().unwrap();
    assert!(
        wait_until_gone(|| !is_running(grandchild)),
        "background process {grandchild} survived the timeout"
    );
}

#[test]
#[cfg(target_os = "linux")]
fn test_timeout_is_not_held_open_by_escaped_descendant() {
    let executor = sh_executor(None);
    let started = Instant::now();

    let result = executor.execute(
        &Script::new("setsid sleep 6 &\necho started\nsleep 30\n"),
        &std::env::temp_dir(),
        Duration::from_secs(1),
    );

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "execute returned after {:?}",
        started.elapsed()
    );
    assert_eq!(result.output, "started\n");
    assert_eq!(result.metadata["stdout_truncated"], true);
    assert_eq!(result.metadata["output_detached"], true);
}

#[test]
#[cfg(target_os = "linux")]
fn test_clean_exit_is_not_held_open_by_escaped_descendant() {
    let executor = sh_executor(None);
    let started = Instant::now();

    let result = executor.execute(
        &Script::new("setsid sleep 6 &\necho EXECUTION_SUCCESS\n"),
        &std::env::temp_dir(),
        Duration::from_secs(10),
    );

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, "EXECUTION_SUCCESS\n");
}

#[test]
fn test_fast_script_is_not_affected_by_timeout() {
    let executor = sh_executor(None);
    let result = executor.execute(
        &Script::new("echo EXECUTION_SUCCESS\n"),
        &std::env::temp_dir(),
        Duration::from_secs(10),
    );
    assert_eq!(result.status(), ExecutionStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.execution_time < Duration::from_secs(10));
}

// =============================================================================
// Output capture
// =============================================================================

#[test]
fn test_large_output_is_capped_without_blocking() {
    let executor = ProcessExecutor::with_wrapper(
        ProcessConfig {
            interpreter: "sh".to_string(),
            interpreter_args: Vec::new(),
            max_output_bytes: 64 * 1024,
            ..ProcessConfig::default()
        },
        PassthroughWrapper::new(".sh"),
    );

    let result = executor.execute(
        &Script::new("head -c 4000000 /dev/zero | tr '\\0' 'x'\necho done >&2\n"),
        &std::env::temp_dir(),
        Duration::from_secs(30),
    );

    assert_eq!(result.status(), ExecutionStatus::Success, "{}", result.error);
    assert_eq!(result.output.len(), 64 * 1024);
    assert_eq!(result.metadata["stdout_truncated"], true);
    assert_eq!(result.error, "done\n");
}

// =============================================================================
// Scratch files
// =============================================================================

#[test]
fn test_scratch_files_are_removed_on_every_path() {
    let scratch = tempfile::tempdir().unwrap();
    let executor = sh_executor(Some(scratch.path()));
    let work = std::env::temp_dir();

    let ok = executor.execute(&Script::new("echo hi\n"), &work, Duration::from_secs(10));
    assert_eq!(ok.status(), ExecutionStatus::Success);

    let failed = executor.execute(&Script::new("exit 4\n"), &work, Duration::from_secs(10));
    assert_eq!(failed.exit_code, Some(4));

    let timed_out = executor.execute(&Script::new("sleep 30\n"), &work, Duration::from_millis(300));
    assert_eq!(timed_out.status(), ExecutionStatus::Timeout);

    let missing_dir = executor.execute(
        &Script::new("echo hi\n"),
        &scratch.path().join("does-not-exist"),
        Duration::from_secs(10),
    );
    assert_eq!(missing_dir.status(), ExecutionStatus::UnknownError);

    assert!(
        scratch_leftovers(scratch.path()).is_empty(),
        "left behind: {:?}",
        scratch_leftovers(scratch.path())
    );
}

#[test]
fn test_rendered_script_lives_in_scratch_dir_while_running() {
    let scratch = tempfile::tempdir().unwrap();
    let executor = sh_executor(Some(scratch.path()));

    let result = executor.execute(
        &Script::new("echo \"$0\"\n"),
        &std::env::temp_dir(),
        Duration::from_secs(10),
    );

    let script_path = Path::new(result.output.trim());
    assert_eq!(script_path.parent().unwrap(), scratch.path());
    let name = script_path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("forgebox-") && name.ends_with(".sh"));
    assert!(!script_path.exists());
}
