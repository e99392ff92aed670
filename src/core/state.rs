//! Execution result models

use crate::core::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Terminal status of a single step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Not executed; never counted as a failure
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// Overall status of a test case (or suite)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of one step execution. Created once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Display name of the step
    pub name: String,

    /// Action identifier (or `if`/`for`/`while` for control blocks)
    pub action: String,

    pub status: StepStatus,

    /// Action output, with secrets masked
    pub output: Value,

    /// Failure message or skip reason, with secrets masked
    pub error: Option<String>,

    /// Number of action attempts made (0 for skipped steps and control blocks)
    pub attempts: u32,

    /// Whether the step was allowed to fail without aborting its list
    pub continue_on_failure: bool,

    #[serde(with = "duration_millis")]
    pub duration: Duration,

    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    /// A failure that aborts the enclosing step list
    pub fn is_blocking_failure(&self) -> bool {
        self.is_failed() && !self.continue_on_failure
    }
}

/// Result of a whole test-case run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub run_id: Uuid,
    pub name: String,
    pub status: TestStatus,

    /// Ordered result log: every attempted, skipped or aborted step
    pub step_results: Vec<StepResult>,

    /// Test-case level error (initialization failure, cancellation, skip reason)
    pub error: Option<String>,

    #[serde(with = "duration_millis")]
    pub duration: Duration,

    pub started_at: DateTime<Utc>,
}

impl TestResult {
    pub fn passed_steps(&self) -> usize {
        self.count(StepStatus::Passed)
    }

    pub fn failed_steps(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped_steps(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.step_results.iter().filter(|r| r.status == status).count()
    }
}

/// Result of running several test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub status: TestStatus,
    pub test_results: Vec<TestResult>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl SuiteResult {
    pub fn passed(&self) -> usize {
        self.test_results.iter().filter(|r| r.status == TestStatus::Passed).count()
    }

    pub fn failed(&self) -> usize {
        self.test_results.iter().filter(|r| r.status == TestStatus::Failed).count()
    }

    pub fn skipped(&self) -> usize {
        self.test_results.iter().filter(|r| r.status == TestStatus::Skipped).count()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
