//! Terminal progress reporting for `forgebox run`.

use std::time::Duration;

use forgebox_core::{ExecutionObserver, ExecutionResult, Script};

use crate::colors;

/// Prints one line per attempt, plus a notice before each retry.
#[derive(Debug, Default)]
pub struct ProgressObserver;

impl ExecutionObserver for ProgressObserver {
    fn on_attempt_started(&self, _script: &Script, attempt: u32, max_attempts: u32) {
        print!(
            "{}  ▶ Attempt{} {}{}/{}{}... ",
            colors::CYAN,
            colors::RESET,
            colors::BOLD,
            attempt,
            max_attempts,
            colors::RESET
        );
        colors::flush_stdout();
    }

    fn on_attempt_finished(&self, _script: &Script, _attempt: u32, result: &ExecutionResult) {
        if result.is_success() {
            println!(
                "{}✓{} {}({:.2}s){}",
                colors::GREEN,
                colors::RESET,
                colors::DIM,
                result.execution_time.as_secs_f64(),
                colors::RESET
            );
        } else {
            println!("{}✗{} {}", colors::RED, colors::RESET, result.status());
        }
    }

    fn on_retry_scheduled(&self, _script: &Script, _attempt: u32, delay: Duration, reason: &str) {
        println!(
            "{}    transient failure:{} {}",
            colors::YELLOW,
            colors::RESET,
            first_line(reason)
        );
        println!(
            "{}    retrying in {:.1}s{}",
            colors::DIM,
            delay.as_secs_f64(),
            colors::RESET
        );
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("a\nb"), "a");
        assert_eq!(first_line(""), "");
    }
}
