//! Running several test cases together

use crate::helpers::MockActions;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepflow::core::config::TestCaseConfig;
use stepflow::{
    EngineConfig, ExecutionEngine, ExecutionEvent, SuiteOptions, TestCase, TestStatus,
};
use tokio_util::sync::CancellationToken;

fn case(yaml: &str) -> TestCase {
    TestCaseConfig::from_yaml(yaml).unwrap().to_test_case().unwrap()
}

fn cases() -> Vec<TestCase> {
    vec![
        case("name: first\nsteps:\n  - action: echo\n"),
        case("name: second\nsteps:\n  - action: fail\n    args: [\"broken\"]\n"),
        case("name: third\nsteps:\n  - action: echo\n"),
    ]
}

#[tokio::test]
async fn test_sequential_suite_runs_everything() {
    let engine = ExecutionEngine::new(MockActions::new(), EngineConfig::default());
    let suite = engine
        .execute_suite(&CancellationToken::new(), &cases(), SuiteOptions::default())
        .await;

    assert_eq!(suite.status, TestStatus::Failed);
    let statuses: Vec<_> = suite.test_results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![TestStatus::Passed, TestStatus::Failed, TestStatus::Passed]
    );
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_cases() {
    let engine = ExecutionEngine::new(MockActions::new(), EngineConfig::default());
    let options = SuiteOptions {
        fail_fast: true,
        ..SuiteOptions::default()
    };
    let suite = engine
        .execute_suite(&CancellationToken::new(), &cases(), options)
        .await;

    assert_eq!(suite.status, TestStatus::Failed);
    let third = &suite.test_results[2];
    assert_eq!(third.status, TestStatus::Skipped);
    assert!(third.step_results.is_empty());
    assert_eq!(third.error.as_deref(), Some("fail-fast: 'second' failed"));
}

#[tokio::test]
async fn test_parallel_suite_keeps_input_order() {
    let slow = case("name: slow\nsteps:\n  - action: slow\n");
    let quick = case("name: quick\nsteps:\n  - action: echo\n");

    let actions = MockActions::new()
        .respond("slow", vec![Ok(json!("done"))])
        .with_delay("slow", Duration::from_millis(50));
    let engine = ExecutionEngine::new(actions, EngineConfig::default());
    let options = SuiteOptions {
        parallel: true,
        max_concurrency: 2,
        ..SuiteOptions::default()
    };
    let suite = engine
        .execute_suite(&CancellationToken::new(), &[slow, quick], options)
        .await;

    assert_eq!(suite.status, TestStatus::Passed);
    let names: Vec<_> = suite.test_results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["slow", "quick"]);
}

#[tokio::test]
async fn test_test_cases_do_not_share_variables() {
    let writer = case(
        "name: writer\nsteps:\n  - action: echo\n    args: [\"leaked\"]\n    result: shared\n",
    );
    let reader = case("name: reader\nsteps:\n  - name: read\n    action: echo\n    args: [\"${shared}\"]\n");

    let engine = ExecutionEngine::new(MockActions::new(), EngineConfig::default());
    let suite = engine
        .execute_suite(&CancellationToken::new(), &[writer, reader], SuiteOptions::default())
        .await;

    let read = &suite.test_results[1].step_results[0];
    assert_eq!(read.output, json!("${shared}"));
}

#[tokio::test]
async fn test_cancelled_suite_marks_cases_not_run() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let engine = ExecutionEngine::new(MockActions::new(), EngineConfig::default());
    let suite = engine
        .execute_suite(&cancel, &cases(), SuiteOptions::default())
        .await;

    assert!(suite
        .test_results
        .iter()
        .all(|r| r.error.as_deref() == Some("execution cancelled")));
}

#[tokio::test]
async fn test_events_follow_execution() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let mut engine = ExecutionEngine::new(MockActions::new(), EngineConfig::default());
    engine.add_event_handler(move |event: ExecutionEvent| {
        let label = match event {
            ExecutionEvent::TestCaseStarted { name, .. } => format!("start {}", name),
            ExecutionEvent::StepStarted { name, .. } => format!("step {}", name),
            ExecutionEvent::StepRetrying { name, attempt, .. } => {
                format!("retry {} #{}", name, attempt)
            }
            ExecutionEvent::StepFinished { result } => {
                format!("done {} {}", result.name, result.status.as_str())
            }
            ExecutionEvent::TestCaseFinished { name, .. } => format!("finish {}", name),
        };
        sink.lock().unwrap().push(label);
    });

    let test_case = case(
        r#"
name: evented
steps:
  - name: flaky
    action: fail
    args: ["nope"]
    continue_on_failure: true
    retry:
      attempts: 2
"#,
    );
    engine
        .execute_test_case(&CancellationToken::new(), &test_case)
        .await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "start evented",
            "step flaky",
            "retry flaky #2",
            "done flaky failed",
            "finish evented",
        ]
    );
}
