//! Step executor - runs step lists and individual steps against an action executor

use crate::{
    action::{ActionExecutor, ActionRequest, LOG_ACTION},
    core::{
        condition::should_skip,
        state::{StepResult, StepStatus},
        step::Step,
        value::{stringify, Value},
        variables::{ResultRecord, VariableStore},
    },
    execution::{
        engine::{EngineConfig, EventHandler, ExecutionEvent},
        error::EngineError,
        expect, retry,
        scheduler::{self, SchedulingStrategy},
    },
};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Boxed future used to break the recursion between step lists and control blocks
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Results of running a step list
#[derive(Debug, Default)]
pub struct StepsOutcome {
    /// Ordered result log, nested steps included
    pub results: Vec<StepResult>,

    /// The list stopped early: a blocking failure or an interruption
    pub failed: bool,

    /// Reason execution stopped without a step failing (e.g. cancellation)
    pub interrupted: Option<String>,
}

impl StepsOutcome {
    pub(crate) fn single(result: StepResult) -> Self {
        Self {
            failed: result.is_blocking_failure(),
            results: vec![result],
            interrupted: None,
        }
    }

    pub(crate) fn interrupted(reason: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            failed: true,
            interrupted: Some(reason.into()),
        }
    }

    /// Append another outcome's results and failure state
    pub(crate) fn absorb(&mut self, other: StepsOutcome) {
        self.results.extend(other.results);
        self.failed |= other.failed;
        if self.interrupted.is_none() {
            self.interrupted = other.interrupted;
        }
    }

    /// Message describing why the list stopped, if it did
    pub fn failure_message(&self) -> Option<String> {
        if let Some(reason) = &self.interrupted {
            return Some(reason.clone());
        }
        if !self.failed {
            return None;
        }
        self.results
            .iter()
            .find(|r| r.is_blocking_failure())
            .map(|r| match &r.error {
                Some(error) => format!("step '{}' failed: {}", r.name, error),
                None => format!("step '{}' failed", r.name),
            })
    }
}

/// Executes steps for one test-case run.
///
/// Cheap to clone: every field is shared, so parallel groups hand a clone to
/// each spawned task.
pub struct StepExecutor<A> {
    actions: Arc<A>,
    variables: Arc<VariableStore>,
    config: Arc<EngineConfig>,
    events: Arc<Vec<EventHandler>>,
    cancel: CancellationToken,
}

impl<A> Clone for StepExecutor<A> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            variables: self.variables.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<A: ActionExecutor + 'static> StepExecutor<A> {
    pub fn new(
        actions: Arc<A>,
        variables: Arc<VariableStore>,
        config: Arc<EngineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            actions,
            variables,
            config,
            events: Arc::new(Vec::new()),
            cancel,
        }
    }

    pub fn with_event_handlers(mut self, events: Arc<Vec<EventHandler>>) -> Self {
        self.events = events;
        self
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn actions(&self) -> &A {
        &self.actions
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn emit(&self, event: ExecutionEvent) {
        for handler in self.events.iter() {
            handler(event.clone());
        }
    }

    /// Run a step list under the configured scheduling strategy
    pub fn execute_steps<'a>(&'a self, steps: &'a [Step]) -> BoxFuture<'a, StepsOutcome> {
        Box::pin(async move {
            match self.config.strategy {
                SchedulingStrategy::Sequential => self.execute_sequential(steps).await,
                SchedulingStrategy::Parallel | SchedulingStrategy::LimitedParallel(_) => {
                    scheduler::execute_parallel(self, steps).await
                }
            }
        })
    }

    async fn execute_sequential(&self, steps: &[Step]) -> StepsOutcome {
        let mut outcome = StepsOutcome::default();
        for step in steps {
            if self.is_cancelled() {
                warn!("Execution cancelled before step '{}'", step.name);
                outcome.absorb(StepsOutcome::interrupted(EngineError::Cancelled.to_string()));
                break;
            }

            outcome.absorb(self.execute_step(step).await);
            if outcome.failed {
                break;
            }
        }
        outcome
    }

    /// Run one step: skip evaluation, then its control block or its action
    pub fn execute_step<'a>(&'a self, step: &'a Step) -> BoxFuture<'a, StepsOutcome> {
        Box::pin(async move {
            let (skip, reason) = should_skip(step.skip.as_ref(), &self.variables);
            if skip {
                info!("Skipping step '{}': {}", step.name, reason);
                return StepsOutcome::single(self.skipped_result(step, reason));
            }

            match &step.control {
                Some(block) => self.execute_control(step, block).await,
                None => StepsOutcome::single(self.execute_action(step).await),
            }
        })
    }

    async fn execute_action(&self, step: &Step) -> StepResult {
        let started = Instant::now();

        let args = step
            .args
            .iter()
            .map(|arg| self.variables.substitute_deep(arg))
            .collect();
        let options = step
            .options
            .iter()
            .map(|(key, value)| (key.clone(), self.variables.substitute_deep(value)))
            .collect();
        let request = ActionRequest::new(step.action.clone(), args).with_options(options);

        if request.silent {
            debug!("Executing step: {} ({})", step.name, step.action);
        } else {
            info!("Executing step: {} ({})", step.name, step.action);
        }
        let shown_args = self.variables.mask(&Value::Array(request.args.clone()).to_string());
        debug!("Step '{}' arguments: {}", step.name, shown_args);
        self.emit(ExecutionEvent::StepStarted {
            name: step.name.clone(),
            action: step.action.clone(),
        });

        let outcome = retry::execute_with_retry(
            step,
            &request,
            self.actions.as_ref(),
            &self.cancel,
            |notice| {
                let reason = self.variables.mask(&notice.reason);
                warn!(
                    "Step '{}' attempt {}/{} failed ({}), retrying in {:?}",
                    step.name,
                    notice.attempt - 1,
                    notice.max_attempts,
                    reason,
                    notice.delay
                );
                self.emit(ExecutionEvent::StepRetrying {
                    name: step.name.clone(),
                    attempt: notice.attempt,
                    max_attempts: notice.max_attempts,
                    delay: notice.delay,
                    reason,
                })
            },
        )
        .await;

        let failure = outcome.failure_message();
        let (status, output, error) = match &step.expect_error {
            Some(expectation) => {
                let observed = outcome.error.clone().or_else(|| failure.clone());
                match expect::check(expectation, observed.as_deref()) {
                    Ok(()) => {
                        let bound = observed.map(Value::String).unwrap_or_else(|| outcome.output.clone());
                        (StepStatus::Passed, bound, None)
                    }
                    Err(mismatch) => (StepStatus::Failed, outcome.output.clone(), Some(mismatch)),
                }
            }
            None => match &failure {
                None => (StepStatus::Passed, outcome.output.clone(), None),
                Some(message) => (StepStatus::Failed, outcome.output.clone(), Some(message.clone())),
            },
        };

        if status == StepStatus::Passed {
            if let Some(variable) = &step.result {
                debug!("Binding output of step '{}' to '{}'", step.name, variable);
                self.variables.set(variable.clone(), output.clone());
            }
        }

        self.variables.record_result(ResultRecord {
            name: step.name.clone(),
            status,
            output: outcome.output.clone(),
            error: outcome.error.clone().or(failure),
            timestamp: Utc::now(),
        });

        if let Some(message) = &error {
            let message = self.variables.mask(message);
            if step.continue_on_failure {
                warn!("Step '{}' failed (continuing): {}", step.name, message);
            } else {
                error!("Step '{}' failed: {}", step.name, message);
            }
        }

        let result = self.finish(step, status, output, error, outcome.attempts, started);
        if step.action == LOG_ACTION && result.status == StepStatus::Passed && !request.silent {
            info!("{}", stringify(&result.output));
        }
        result
    }

    /// Record a step that was never executed
    pub(crate) fn skipped_result(&self, step: &Step, reason: String) -> StepResult {
        self.finish(step, StepStatus::Skipped, Value::Null, Some(reason), 0, Instant::now())
    }

    /// Record a step that failed outside of its own execution (e.g. aborted)
    pub(crate) fn failed_result(&self, step: &Step, error: String, started: Instant) -> StepResult {
        self.finish(step, StepStatus::Failed, Value::Null, Some(error), 0, started)
    }

    /// Build the immutable result, masking secrets, and publish it
    pub(crate) fn finish(
        &self,
        step: &Step,
        status: StepStatus,
        output: Value,
        error: Option<String>,
        attempts: u32,
        started: Instant,
    ) -> StepResult {
        let result = StepResult {
            name: step.name.clone(),
            action: step.kind().to_string(),
            status,
            output: self.variables.mask_value(&output),
            error: error.map(|e| self.variables.mask(&e)),
            attempts,
            continue_on_failure: step.continue_on_failure,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        };
        self.emit(ExecutionEvent::StepFinished {
            result: result.clone(),
        });
        result
    }
}
