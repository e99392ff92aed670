//! Skip evaluation and result aggregation

use crate::core::{
    state::{StepResult, StepStatus, TestStatus},
    step::SkipCondition,
    variables::VariableStore,
};

/// Decide whether a step or test case should be skipped.
///
/// Returns the decision and, when skipping, a human-readable reason. A string
/// condition is substituted first and skips unless it is empty, `"false"` or
/// `"0"`.
pub fn should_skip(skip: Option<&SkipCondition>, variables: &VariableStore) -> (bool, String) {
    match skip {
        None | Some(SkipCondition::Flag(false)) => (false, String::new()),
        Some(SkipCondition::Flag(true)) => (true, "skip: true".to_string()),
        Some(SkipCondition::Expr(expr)) => {
            let resolved = variables.substitute(expr);
            let text = resolved.trim();
            if text.is_empty() || text == "false" || text == "0" {
                (false, String::new())
            } else {
                (true, format!("skip condition: {}", variables.mask(text)))
            }
        }
    }
}

/// Overall status of an ordered result log.
///
/// Failed if any failure was not covered by `continue_on_failure`; Skipped
/// only when every recorded step was skipped; otherwise Passed.
pub fn aggregate_status(results: &[StepResult]) -> TestStatus {
    if results.iter().any(StepResult::is_blocking_failure) {
        TestStatus::Failed
    } else if !results.is_empty() && results.iter().all(|r| r.status == StepStatus::Skipped) {
        TestStatus::Skipped
    } else {
        TestStatus::Passed
    }
}
