//! Main execution engine - runs test cases and suites

use crate::{
    action::ActionExecutor,
    core::{
        condition::{aggregate_status, should_skip},
        state::{StepResult, SuiteResult, TestResult, TestStatus},
        step::Step,
        testcase::TestCase,
        variables::VariableStore,
    },
    execution::{
        executor::{StepExecutor, StepsOutcome},
        scheduler::SchedulingStrategy,
    },
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Actions that never share a parallel group with other steps
pub const DEFAULT_UNSAFE_ACTIONS: [&str; 5] = ["set_global", "db_write", "db_exec", "file_write", "shell"];

/// Engine-wide execution settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: SchedulingStrategy,

    /// Action names that always run in a group of their own
    pub unsafe_actions: HashSet<String>,

    /// Deadline for collecting one parallel group
    pub group_timeout: Duration,

    /// `while` cap when the block sets none
    pub max_while_iterations: u32,

    /// Absolute cap on `for` iteration counts
    pub max_for_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::Sequential,
            unsafe_actions: DEFAULT_UNSAFE_ACTIONS.iter().map(|a| a.to_string()).collect(),
            group_timeout: Duration::from_secs(600),
            max_while_iterations: 1000,
            max_for_iterations: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn with_strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_unsafe_action(mut self, action: impl Into<String>) -> Self {
        self.unsafe_actions.insert(action.into());
        self
    }

    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = timeout;
        self
    }
}

/// Options for running several test cases
#[derive(Debug, Clone, Copy)]
pub struct SuiteOptions {
    /// Run test cases concurrently
    pub parallel: bool,
    /// Stop after the first failed test case (sequential runs only)
    pub fail_fast: bool,
    /// Concurrent test cases when `parallel` is set
    pub max_concurrency: usize,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
            max_concurrency: 4,
        }
    }
}

/// Events that can occur during test execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    TestCaseStarted {
        run_id: Uuid,
        name: String,
    },
    StepStarted {
        name: String,
        action: String,
    },
    StepRetrying {
        name: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: String,
    },
    StepFinished {
        result: StepResult,
    },
    TestCaseFinished {
        run_id: Uuid,
        name: String,
        status: TestStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main test execution engine
pub struct ExecutionEngine<A> {
    actions: Arc<A>,
    config: Arc<EngineConfig>,
    event_handlers: Arc<Vec<EventHandler>>,
}

impl<A> Clone for ExecutionEngine<A> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            config: self.config.clone(),
            event_handlers: self.event_handlers.clone(),
        }
    }
}

impl<A: ActionExecutor + 'static> ExecutionEngine<A> {
    pub fn new(actions: A, config: EngineConfig) -> Self {
        Self::from_shared(Arc::new(actions), config)
    }

    /// Build an engine around an executor the caller keeps a handle to
    pub fn from_shared(actions: Arc<A>, config: EngineConfig) -> Self {
        Self {
            actions,
            config: Arc::new(config),
            event_handlers: Arc::new(Vec::new()),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.event_handlers).push(Arc::new(handler));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in self.event_handlers.iter() {
            handler(event.clone());
        }
    }

    fn executor(&self, variables: Arc<VariableStore>, cancel: &CancellationToken) -> StepExecutor<A> {
        StepExecutor::new(self.actions.clone(), variables, self.config.clone(), cancel.clone())
            .with_event_handlers(self.event_handlers.clone())
    }

    /// Run a step list against an existing variable store
    pub async fn execute_steps(
        &self,
        cancel: &CancellationToken,
        steps: &[Step],
        variables: Arc<VariableStore>,
    ) -> Vec<StepResult> {
        self.executor(variables, cancel).execute_steps(steps).await.results
    }

    /// Run one test case with a fresh variable store
    pub async fn execute_test_case(&self, cancel: &CancellationToken, test_case: &TestCase) -> TestResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        info!("Starting test case: {} ({})", test_case.name, run_id);
        self.emit_event(ExecutionEvent::TestCaseStarted {
            run_id,
            name: test_case.name.clone(),
        });

        let finish = |status: TestStatus, step_results: Vec<StepResult>, error: Option<String>| {
            let result = TestResult {
                run_id,
                name: test_case.name.clone(),
                status,
                step_results,
                error,
                duration: started.elapsed(),
                started_at,
            };
            info!(
                "Test case '{}' {:?}: {} passed, {} failed, {} skipped",
                result.name,
                result.status,
                result.passed_steps(),
                result.failed_steps(),
                result.skipped_steps()
            );
            self.emit_event(ExecutionEvent::TestCaseFinished {
                run_id,
                name: result.name.clone(),
                status,
            });
            result
        };

        let variables = Arc::new(VariableStore::new());
        if let Err(e) = variables.initialize(&test_case.secrets, &test_case.variables) {
            error!("Variable initialization failed for '{}': {}", test_case.name, e);
            return finish(TestStatus::Failed, Vec::new(), Some(e.to_string()));
        }

        let (skip, reason) = should_skip(test_case.skip.as_ref(), &variables);
        if skip {
            info!("Skipping test case '{}': {}", test_case.name, reason);
            return finish(TestStatus::Skipped, Vec::new(), Some(reason));
        }

        let executor = self.executor(variables, cancel);
        let mut outcome = executor.execute_steps(&test_case.steps).await;

        if !test_case.teardown.is_empty() {
            debug!("Running {} teardown step(s)", test_case.teardown.len());
            let teardown = executor.execute_steps(&test_case.teardown).await;
            outcome.absorb(teardown);
        }

        let error = outcome.failure_message();
        let StepsOutcome {
            results,
            interrupted,
            ..
        } = outcome;
        let status = match interrupted {
            Some(_) => TestStatus::Failed,
            None => aggregate_status(&results),
        };
        let error = (status == TestStatus::Failed).then_some(error).flatten();
        finish(status, results, error)
    }

    /// Run several test cases, sequentially or concurrently
    pub async fn execute_suite(
        &self,
        cancel: &CancellationToken,
        test_cases: &[TestCase],
        options: SuiteOptions,
    ) -> SuiteResult {
        let started = Instant::now();
        let test_results = if options.parallel {
            if options.fail_fast {
                debug!("fail_fast has no effect on parallel suites");
            }
            self.execute_suite_parallel(cancel, test_cases, options.max_concurrency)
                .await
        } else {
            self.execute_suite_sequential(cancel, test_cases, options.fail_fast)
                .await
        };

        let status = if test_results.iter().any(|r| r.status == TestStatus::Failed) {
            TestStatus::Failed
        } else if !test_results.is_empty()
            && test_results.iter().all(|r| r.status == TestStatus::Skipped)
        {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        };

        SuiteResult {
            status,
            test_results,
            duration: started.elapsed(),
        }
    }

    async fn execute_suite_sequential(
        &self,
        cancel: &CancellationToken,
        test_cases: &[TestCase],
        fail_fast: bool,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(test_cases.len());
        let mut stop_reason: Option<String> = None;

        for test_case in test_cases {
            if stop_reason.is_none() && cancel.is_cancelled() {
                stop_reason = Some("execution cancelled".to_string());
            }
            if let Some(reason) = &stop_reason {
                results.push(not_run(test_case, reason));
                continue;
            }

            let result = self.execute_test_case(cancel, test_case).await;
            if fail_fast && result.status == TestStatus::Failed {
                warn!("Stopping suite after '{}' failed (fail-fast)", result.name);
                stop_reason = Some(format!("fail-fast: '{}' failed", result.name));
            }
            results.push(result);
        }
        results
    }

    async fn execute_suite_parallel(
        &self,
        cancel: &CancellationToken,
        test_cases: &[TestCase],
        max_concurrency: usize,
    ) -> Vec<TestResult> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = Vec::with_capacity(test_cases.len());

        for test_case in test_cases {
            let engine = self.clone();
            let test_case = test_case.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                engine.execute_test_case(&cancel, &test_case).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (task, test_case) in tasks.into_iter().zip(test_cases) {
            match task.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Test case '{}' task failed: {}", test_case.name, e);
                    results.push(TestResult {
                        status: TestStatus::Failed,
                        error: Some(format!("test case task failed: {}", e)),
                        ..not_run(test_case, "")
                    });
                }
            }
        }
        results
    }
}

/// Result for a test case that was never started
fn not_run(test_case: &TestCase, reason: &str) -> TestResult {
    TestResult {
        run_id: Uuid::new_v4(),
        name: test_case.name.clone(),
        status: TestStatus::Skipped,
        step_results: Vec::new(),
        error: Some(reason.to_string()),
        duration: Duration::ZERO,
        started_at: Utc::now(),
    }
}
