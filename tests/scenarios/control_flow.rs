//! if / for / while blocks driven from YAML

use crate::helpers::*;
use serde_json::json;
use stepflow::StepStatus;

#[tokio::test]
async fn test_if_takes_else_branch() {
    let yaml = r#"
name: "Branching"
variables:
  env: "staging"
steps:
  - name: "choose"
    if:
      condition: "${env} == prod"
      then:
        - name: "prod only"
          action: echo
          args: ["prod"]
      else:
        - name: "everywhere else"
          action: echo
          args: ["${env}"]
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_eq!(step_names(&result), vec!["everywhere else", "choose"]);
    assert_eq!(step(&result, "everywhere else").output, json!("staging"));
    assert_eq!(step(&result, "choose").output, json!(false));
}

#[tokio::test]
async fn test_if_with_compound_condition() {
    let yaml = r#"
name: "Compound"
variables:
  status: 200
  body: "ok, created"
steps:
  - name: "check"
    if:
      condition: "${status} >= 200 && ${status} < 300 && '${body}' contains created"
      then:
        - name: "success path"
          action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_step_status(&result, "success path", StepStatus::Passed);
    assert_eq!(step(&result, "check").output, json!(true));
}

#[tokio::test]
async fn test_for_exposes_iteration_and_index() {
    let yaml = r#"
name: "Counting"
variables:
  count: 3
steps:
  - name: "loop"
    for:
      condition: "${count}"
      steps:
        - name: "item"
          action: echo
          args: ["item-${index}-${iteration}"]
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    let outputs: Vec<_> = steps_named(&result, "item")
        .iter()
        .map(|r| r.output.clone())
        .collect();
    assert_eq!(outputs, vec![json!("item-0-1"), json!("item-1-2"), json!("item-2-3")]);
    assert_eq!(step(&result, "loop").output, json!(3));
}

#[tokio::test]
async fn test_for_respects_max_iterations() {
    let yaml = r#"
name: "Clamped"
steps:
  - name: "loop"
    for:
      condition: "100"
      max_iterations: 2
      steps:
        - name: "item"
          action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_eq!(steps_named(&result, "item").len(), 2);
}

#[tokio::test]
async fn test_while_polls_until_condition_clears() {
    let yaml = r#"
name: "Polling"
variables:
  state: "pending"
steps:
  - name: "wait for job"
    while:
      condition: "${state} != done"
      steps:
        - name: "poll"
          action: job_status
          result: state
  - name: "after"
    action: echo
    args: ["${state} after ${iteration} polls"]
"#;

    let actions = MockActions::new().respond(
        "job_status",
        vec![Ok(json!("pending")), Ok(json!("running")), Ok(json!("done"))],
    );
    let (result, actions) = run_yaml(yaml, actions).await;

    assert_test_passed(&result);
    assert_eq!(actions.calls("job_status"), 3);
    assert_eq!(step(&result, "after").output, json!("done after 3 polls"));
}

#[tokio::test]
async fn test_while_runaway_fails_the_test() {
    let yaml = r#"
name: "Runaway"
steps:
  - name: "forever"
    while:
      condition: "true"
      max_iterations: 3
      steps:
        - name: "spin"
          action: echo
  - name: "unreachable"
    action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_failed(&result);
    assert_eq!(steps_named(&result, "spin").len(), 3);
    let block = step(&result, "forever");
    assert_eq!(block.status, StepStatus::Failed);
    assert!(block.error.as_deref().unwrap().contains("maximum of 3"));
    assert!(!step_names(&result).contains(&"unreachable"));
}

#[tokio::test]
async fn test_invalid_for_count_fails_block() {
    let yaml = r#"
name: "Bad count"
variables:
  count: "many"
steps:
  - name: "loop"
    for:
      condition: "${count}"
      steps:
        - action: echo
"#;

    let (result, _) = run_yaml(yaml, MockActions::new()).await;

    assert_test_failed(&result);
    let block = step(&result, "loop");
    assert!(block.error.as_deref().unwrap().contains("for condition"));
}

#[tokio::test]
async fn test_nested_loops_with_conditional_body() {
    let yaml = r#"
name: "Nested"
steps:
  - name: "outer"
    for:
      condition: "2"
      steps:
        - name: "branch"
          if:
            condition: "${index} == 1"
            then:
              - name: "second pass"
                action: echo
                args: ["${iteration}"]
"#;

    let (result, actions) = run_yaml(yaml, MockActions::new()).await;

    assert_test_passed(&result);
    assert_eq!(steps_named(&result, "branch").len(), 2);
    assert_eq!(steps_named(&result, "second pass").len(), 1);
    assert_eq!(step(&result, "second pass").output, json!("2"));
    // One for evaluation plus one if evaluation per iteration, all silent
    let control = actions.requests_for("control");
    assert_eq!(control.len(), 3);
    assert!(control.iter().all(|r| r.silent));
}
