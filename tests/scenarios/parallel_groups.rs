//! Dependency-aware parallel execution

use crate::helpers::*;
use serde_json::json;
use std::time::Duration;
use stepflow::{EngineConfig, SchedulingStrategy, StepStatus};

fn parallel() -> EngineConfig {
    EngineConfig::default().with_strategy(SchedulingStrategy::Parallel)
}

#[tokio::test]
async fn test_independent_steps_run_concurrently() {
    let yaml = r#"
name: "Fan out"
steps:
  - name: "users"
    action: fetch
    args: ["users"]
    result: users
  - name: "orders"
    action: fetch
    args: ["orders"]
    result: orders
  - name: "items"
    action: fetch
    args: ["items"]
    result: items
  - name: "combine"
    action: echo
    args: ["${users}+${orders}+${items}"]
"#;

    let actions = MockActions::new()
        .respond("fetch", vec![Ok(json!("a")), Ok(json!("b")), Ok(json!("c"))])
        .with_delay("fetch", Duration::from_millis(50));
    let (result, actions) = run_yaml_with(yaml, actions, parallel()).await;

    assert_test_passed(&result);
    assert_eq!(actions.max_in_flight(), 3);
    // Results stay in declaration order regardless of completion order
    assert_eq!(step_names(&result), vec!["users", "orders", "items", "combine"]);
    let combined = step(&result, "combine").output.as_str().unwrap().to_string();
    let mut parts: Vec<&str> = combined.split('+').collect();
    parts.sort();
    assert_eq!(parts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_limited_parallel_bounds_concurrency() {
    let yaml = r#"
name: "Bounded"
steps:
  - action: fetch
  - action: fetch
  - action: fetch
  - action: fetch
  - action: fetch
"#;

    let actions = MockActions::new()
        .respond("fetch", vec![Ok(json!("ok"))])
        .with_delay("fetch", Duration::from_millis(30));
    let config = EngineConfig::default().with_strategy(SchedulingStrategy::LimitedParallel(2));
    let (result, actions) = run_yaml_with(yaml, actions, config).await;

    assert_test_passed(&result);
    assert_eq!(actions.calls("fetch"), 5);
    assert_eq!(actions.max_in_flight(), 2);
}

#[tokio::test]
async fn test_dependency_chain_runs_in_order() {
    let yaml = r#"
name: "Chain"
steps:
  - name: "login"
    action: auth
    result: session
  - name: "profile"
    action: fetch
    args: ["${session}"]
    result: profile
  - name: "settings"
    action: fetch
    args: ["${profile}/settings"]
"#;

    let actions = MockActions::new()
        .respond("auth", vec![Ok(json!("sess-1"))])
        .respond("fetch", vec![Ok(json!("profile-7")), Ok(json!("dark-mode"))]);
    let (result, actions) = run_yaml_with(yaml, actions, parallel()).await;

    assert_test_passed(&result);
    assert_eq!(actions.max_in_flight(), 1);
    let fetches = actions.requests_for("fetch");
    assert_eq!(fetches[0].args, vec![json!("sess-1")]);
    assert_eq!(fetches[1].args, vec![json!("profile-7/settings")]);
}

#[tokio::test]
async fn test_unsafe_actions_run_alone() {
    let yaml = r#"
name: "Side effects"
steps:
  - action: fetch
  - action: db_write
  - action: fetch
"#;

    let actions = MockActions::new()
        .respond("fetch", vec![Ok(json!("ok"))])
        .respond("db_write", vec![Ok(json!("written"))])
        .with_delay("fetch", Duration::from_millis(20))
        .with_delay("db_write", Duration::from_millis(20));
    let (result, actions) = run_yaml_with(yaml, actions, parallel()).await;

    assert_test_passed(&result);
    assert_eq!(actions.max_in_flight(), 1);
}

#[tokio::test]
async fn test_custom_unsafe_action() {
    let yaml = r#"
name: "Custom denylist"
steps:
  - action: fetch
  - action: fetch
"#;

    let actions = MockActions::new()
        .respond("fetch", vec![Ok(json!("ok"))])
        .with_delay("fetch", Duration::from_millis(20));
    let config = parallel().with_unsafe_action("fetch");
    let (result, actions) = run_yaml_with(yaml, actions, config).await;

    assert_test_passed(&result);
    assert_eq!(actions.max_in_flight(), 1);
}

#[tokio::test]
async fn test_group_failure_stops_later_groups() {
    let yaml = r#"
name: "Group failure"
steps:
  - name: "good"
    action: fetch
    result: good
  - name: "bad"
    action: fail
    args: ["backend down"]
  - name: "dependent"
    action: echo
    args: ["${good}"]
"#;

    let actions = MockActions::new().respond("fetch", vec![Ok(json!("ok"))]);
    let (result, _) = run_yaml_with(yaml, actions, parallel()).await;

    assert_test_failed(&result);
    assert_step_status(&result, "bad", StepStatus::Failed);
    assert!(!step_names(&result).contains(&"dependent"));
}

#[tokio::test]
async fn test_tolerated_group_failure_continues() {
    let yaml = r#"
name: "Tolerated group failure"
steps:
  - name: "good"
    action: fetch
    result: good
  - name: "bad"
    action: fail
    continue_on_failure: true
  - name: "dependent"
    action: echo
    args: ["${good}"]
"#;

    let actions = MockActions::new().respond("fetch", vec![Ok(json!("ok"))]);
    let (result, _) = run_yaml_with(yaml, actions, parallel()).await;

    assert_test_passed(&result);
    assert_eq!(step(&result, "dependent").output, json!("ok"));
}

#[tokio::test]
async fn test_group_deadline_fails_stragglers() {
    let yaml = r#"
name: "Deadline"
steps:
  - name: "quick"
    action: echo
  - name: "stuck"
    action: hang
"#;

    let actions = MockActions::new()
        .respond("hang", vec![Ok(json!("late"))])
        .with_delay("hang", Duration::from_secs(30));
    let config = parallel().with_group_timeout(Duration::from_millis(100));
    let (result, _) = run_yaml_with(yaml, actions, config).await;

    assert_test_failed(&result);
    assert_step_status(&result, "quick", StepStatus::Passed);
    let stuck = step(&result, "stuck");
    assert_eq!(stuck.status, StepStatus::Failed);
    assert!(stuck.error.as_deref().unwrap().contains("timed out"));
}
