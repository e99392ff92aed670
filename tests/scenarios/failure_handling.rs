//! Failure propagation, continue_on_failure, skips and teardown

use crate::helpers::*;
use serde_json::json;
use stepflow::{StepStatus, TestStatus};

#[tokio::test]
async fn test_failure_stops_remaining_steps() {
    let yaml = r#"
name: "Stops"
steps:
  - name: "setup"
    action: echo
  - name: "break"
    action: fail
    args: ["boom"]
  - name: "never"
    action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_failed(&result);
    assert_eq!(step_names(&result), vec!["setup", "break"]);
    assert_eq!(result.error.as_deref(), Some("step 'break' failed: boom"));
}

#[tokio::test]
async fn test_continue_on_failure_keeps_going() {
    let yaml = r#"
name: "Keeps going"
steps:
  - name: "optional"
    action: fail
    args: ["cache miss"]
    continue_on_failure: true
  - name: "fallback"
    action: echo
    args: ["recovered from ${steps[-1].error}"]
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_step_status(&result, "optional", StepStatus::Failed);
    assert_eq!(step(&result, "fallback").output, json!("recovered from cache miss"));
    assert_eq!(result.failed_steps(), 1);
}

#[tokio::test]
async fn test_teardown_runs_after_failure() {
    let yaml = r#"
name: "Cleanup"
steps:
  - name: "create"
    action: echo
    args: ["resource-1"]
    result: resource
  - name: "break"
    action: fail
teardown:
  - name: "delete"
    action: cleanup
    args: ["${resource}"]
"#;

    let actions = MockActions::new().respond("cleanup", vec![Ok(json!("deleted"))]);
    let (result, actions) = run_yaml(yaml, actions).await;

    assert_test_failed(&result);
    assert_step_status(&result, "delete", StepStatus::Passed);
    assert_eq!(actions.requests_for("cleanup")[0].args, vec![json!("resource-1")]);
    assert_eq!(step_names(&result).last(), Some(&"delete"));
}

#[tokio::test]
async fn test_failing_teardown_fails_passing_test() {
    let yaml = r#"
name: "Teardown fails"
steps:
  - name: "work"
    action: echo
teardown:
  - name: "delete"
    action: fail
    args: ["already gone"]
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_failed(&result);
    assert_step_status(&result, "work", StepStatus::Passed);
    assert!(result.error.as_deref().unwrap().contains("already gone"));
}

#[tokio::test]
async fn test_skip_conditions() {
    let yaml = r#"
name: "Skips"
variables:
  slow_enabled: "false"
  flaky_disabled: "true"
steps:
  - name: "always skipped"
    action: fail
    skip: true
  - name: "slow"
    action: echo
    skip: "${slow_enabled}"
  - name: "flaky"
    action: fail
    skip: "${flaky_disabled}"
"#;

    let (result, actions) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_step_status(&result, "always skipped", StepStatus::Skipped);
    assert_step_status(&result, "slow", StepStatus::Passed);
    assert_step_status(&result, "flaky", StepStatus::Skipped);
    assert_eq!(actions.calls("fail"), 0);
    assert!(step(&result, "flaky").error.as_deref().unwrap().contains("skip condition"));
}

#[tokio::test]
async fn test_skipped_test_case_runs_nothing() {
    let yaml = r#"
name: "Disabled"
skip: true
steps:
  - action: fail
"#;

    let (result, actions) = run_yaml(yaml, MockActions::new()).await;

    assert_eq!(result.status, TestStatus::Skipped);
    assert!(result.step_results.is_empty());
    assert_eq!(actions.calls("fail"), 0);
}

#[tokio::test]
async fn test_all_steps_skipped_marks_test_skipped() {
    let yaml = r#"
name: "Nothing to do"
steps:
  - action: echo
    skip: true
  - action: echo
    skip: "yes"
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_eq!(result.status, TestStatus::Skipped);
    assert_eq!(result.skipped_steps(), 2);
}

#[tokio::test]
async fn test_loop_block_continue_on_failure() {
    let yaml = r#"
name: "Tolerant loop"
steps:
  - name: "attempts"
    continue_on_failure: true
    for:
      condition: "3"
      steps:
        - name: "attempt"
          action: fail
          args: ["attempt ${iteration} failed"]
  - name: "after"
    action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    // The body stops at the first failure and the block absorbs it, so the
    // list carries on; the untolerated nested failure still fails the test
    assert_eq!(steps_named(&result, "attempt").len(), 1);
    let block = step(&result, "attempts");
    assert_eq!(block.status, StepStatus::Failed);
    assert!(block.error.as_deref().unwrap().contains("attempt 1 failed"));
    assert_step_status(&result, "after", StepStatus::Passed);
    assert_test_failed(&result);
}

#[tokio::test]
async fn test_tolerated_failures_inside_loop() {
    let yaml = r#"
name: "Tolerant body"
steps:
  - name: "attempts"
    for:
      condition: "3"
      steps:
        - name: "attempt"
          action: fail
          args: ["attempt ${iteration} failed"]
          continue_on_failure: true
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    let errors: Vec<_> = steps_named(&result, "attempt")
        .iter()
        .map(|r| r.error.clone().unwrap())
        .collect();
    assert_eq!(errors, vec!["attempt 1 failed", "attempt 2 failed", "attempt 3 failed"]);
    assert_step_status(&result, "attempts", StepStatus::Passed);
}
