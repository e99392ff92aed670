//! CLI output formatting

use crate::{
    core::{StepResult, StepStatus, SuiteResult, TestResult, TestStatus},
    execution::ExecutionEvent,
};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Format a test status for display
pub fn format_status(status: TestStatus) -> String {
    match status {
        TestStatus::Passed => style("PASSED").green().to_string(),
        TestStatus::Failed => style("FAILED").red().to_string(),
        TestStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a finished step as a single line
pub fn format_step_result(result: &StepResult) -> String {
    let timing = style(format!("({})", format_duration(result.duration))).dim();
    match result.status {
        StepStatus::Passed => {
            let attempts = if result.attempts > 1 {
                format!(" after {} attempts", result.attempts)
            } else {
                String::new()
            };
            format!(
                "{} {} [{}]{} {}",
                CHECK,
                style(&result.name).green(),
                style(&result.action).dim(),
                attempts,
                timing
            )
        }
        StepStatus::Failed => {
            let icon = if result.continue_on_failure { WARN } else { CROSS };
            format!(
                "{} {} [{}]: {} {}",
                icon,
                style(&result.name).red(),
                style(&result.action).dim(),
                style(result.error.as_deref().unwrap_or("failed")).dim(),
                timing
            )
        }
        StepStatus::Skipped => format!(
            "{} {} ({})",
            SKIP,
            style(&result.name).dim(),
            result.error.as_deref().unwrap_or("skipped")
        ),
    }
}

/// Format an execution event for display; step starts are not printed
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::TestCaseStarted { run_id, name } => format!(
            "{} Starting test case {} ({})",
            ROCKET,
            style(name).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepRetrying {
            name,
            attempt,
            max_attempts,
            delay,
            reason,
        } => format!(
            "{} {} (attempt {}/{} in {}): {}",
            SPINNER,
            style(name).yellow(),
            attempt,
            max_attempts,
            format_duration(*delay),
            style(reason).dim()
        ),
        ExecutionEvent::StepFinished { result } => format_step_result(result),
        ExecutionEvent::TestCaseFinished { run_id, name, status } => format!(
            "{} Test case {} ({}) {}",
            INFO,
            style(name).bold(),
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// One-line summary of a test case
pub fn format_test_summary(result: &TestResult) -> String {
    let icon = match result.status {
        TestStatus::Passed => CHECK,
        TestStatus::Failed => CROSS,
        TestStatus::Skipped => SKIP,
    };
    let mut line = format!(
        "{} {} - {} - {} passed, {} failed, {} skipped ({})",
        icon,
        style(&result.name).bold(),
        format_status(result.status),
        style(result.passed_steps()).green(),
        style(result.failed_steps()).red(),
        style(result.skipped_steps()).dim(),
        format_duration(result.duration)
    );
    if let Some(error) = &result.error {
        line.push_str(&format!("\n    {}", style(error).dim()));
    }
    line
}

/// Multi-line summary of a suite run
pub fn format_suite_summary(suite: &SuiteResult) -> String {
    let mut lines: Vec<String> = suite.test_results.iter().map(format_test_summary).collect();
    lines.push(format!(
        "{} {} test case(s): {} passed, {} failed, {} skipped in {}",
        match suite.status {
            TestStatus::Failed => CROSS,
            _ => CHECK,
        },
        suite.test_results.len(),
        style(suite.passed()).green(),
        style(suite.failed()).red(),
        style(suite.skipped()).dim(),
        format_duration(suite.duration)
    ));
    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
