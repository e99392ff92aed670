//! Test utility functions for stepflow scenarios

use std::sync::Arc;
use stepflow::core::config::TestCaseConfig;
use stepflow::{EngineConfig, ExecutionEngine, StepResult, StepStatus, TestResult, TestStatus};
use tokio_util::sync::CancellationToken;

pub use stepflow::execution::testing::MockActions;

/// Parse a YAML test case and run it with the default engine config
pub async fn run_yaml(yaml: &str, actions: MockActions) -> (TestResult, Arc<MockActions>) {
    run_yaml_with(yaml, actions, EngineConfig::default()).await
}

/// Parse a YAML test case and run it with a custom engine config
pub async fn run_yaml_with(
    yaml: &str,
    actions: MockActions,
    config: EngineConfig,
) -> (TestResult, Arc<MockActions>) {
    let test_case = TestCaseConfig::from_yaml(yaml)
        .and_then(|c| c.to_test_case())
        .expect("test case YAML is valid");
    let actions = Arc::new(actions);
    let engine = ExecutionEngine::from_shared(actions.clone(), config);
    let result = engine
        .execute_test_case(&CancellationToken::new(), &test_case)
        .await;
    (result, actions)
}

/// The result of the step called `name` (the last one, for loop bodies)
pub fn step<'a>(result: &'a TestResult, name: &str) -> &'a StepResult {
    result
        .step_results
        .iter()
        .rev()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no result for step '{}' in {:#?}", name, result.step_results))
}

/// Every result recorded for the step called `name`
pub fn steps_named<'a>(result: &'a TestResult, name: &str) -> Vec<&'a StepResult> {
    result.step_results.iter().filter(|r| r.name == name).collect()
}

/// Names of all recorded results, in order
pub fn step_names(result: &TestResult) -> Vec<&str> {
    result.step_results.iter().map(|r| r.name.as_str()).collect()
}

/// Assert that the test case passed, dumping the result log otherwise
pub fn assert_test_passed(result: &TestResult) {
    assert_eq!(
        result.status,
        TestStatus::Passed,
        "test case failed: {:?}\n{:#?}",
        result.error,
        result.step_results
    );
}

pub fn assert_test_failed(result: &TestResult) {
    assert_eq!(
        result.status,
        TestStatus::Failed,
        "test case unexpectedly {:?}\n{:#?}",
        result.status,
        result.step_results
    );
}

pub fn assert_step_status(result: &TestResult, name: &str, status: StepStatus) {
    assert_eq!(step(result, name).status, status, "step '{}'", name);
}
