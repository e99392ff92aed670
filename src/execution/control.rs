//! Control-flow interpreter for `if` / `for` / `while` blocks
//!
//! Conditions are substituted, then evaluated through the action executor's
//! `control` action, so the expression language belongs to the executor.

use crate::{
    action::{ActionError, ActionExecutor, ActionRequest},
    core::{
        state::StepStatus,
        step::{ConditionalBlock, ControlBlock, LoopBlock, Step},
        value::{as_iteration_count, is_true, Value},
        variables::{INDEX_VARIABLE, ITERATION_VARIABLE},
    },
    execution::{
        error::EngineError,
        executor::{StepExecutor, StepsOutcome},
        ExecutionEvent,
    },
};
use std::time::Instant;
use tracing::{debug, error, warn};

impl<A: ActionExecutor + 'static> StepExecutor<A> {
    /// Run a control block. Nested results come first, the block's own result last.
    pub(crate) async fn execute_control(&self, step: &Step, block: &ControlBlock) -> StepsOutcome {
        let started = Instant::now();
        debug!("Entering {} block '{}'", block.kind(), step.name);
        self.emit(ExecutionEvent::StepStarted {
            name: step.name.clone(),
            action: block.kind().to_string(),
        });

        let mut nested = StepsOutcome::default();
        let result = match block {
            ControlBlock::If(conditional) => self.run_if(conditional, &mut nested).await,
            ControlBlock::For(body) => self.run_for(body, &mut nested).await,
            ControlBlock::While(body) => self.run_while(body, &mut nested).await,
        };

        let (status, output, error) = match result {
            Ok(output) => (StepStatus::Passed, output, None),
            Err(message) => {
                error!("{} block '{}' failed: {}", block.kind(), step.name, self.variables().mask(&message));
                (StepStatus::Failed, Value::Null, Some(message))
            }
        };

        let block_result = self.finish(step, status, output, error, 0, started);
        let failed = block_result.is_blocking_failure();
        nested.results.push(block_result);
        StepsOutcome {
            results: nested.results,
            failed,
            interrupted: nested.interrupted,
        }
    }

    /// Substitute and evaluate a condition via the `control` action
    async fn evaluate(&self, kind: &str, condition: &str) -> Result<Value, EngineError> {
        let resolved = self.variables().substitute(condition);
        let request = ActionRequest::control(kind, resolved.clone());
        self.actions()
            .execute(self.cancel_token(), &request)
            .await
            .map_err(|e| match e {
                ActionError::Cancelled => EngineError::Cancelled,
                other => EngineError::Evaluation(format!(
                    "{} condition '{}': {}",
                    kind,
                    self.variables().mask(&resolved),
                    other
                )),
            })
    }

    async fn run_if(&self, block: &ConditionalBlock, nested: &mut StepsOutcome) -> Result<Value, String> {
        let taken = is_true(&self.evaluate("if", &block.condition).await.map_err(|e| e.to_string())?);
        let branch = if taken { &block.then_steps } else { &block.else_steps };
        debug!(
            "if condition is {}, running {} step(s)",
            taken,
            branch.len()
        );

        let outcome = self.execute_steps(branch).await;
        let failure = outcome.failure_message();
        nested.absorb(outcome);
        match failure {
            Some(message) => Err(message),
            None => Ok(Value::Bool(taken)),
        }
    }

    async fn run_for(&self, block: &LoopBlock, nested: &mut StepsOutcome) -> Result<Value, String> {
        let value = self.evaluate("for", &block.condition).await.map_err(|e| e.to_string())?;
        let mut count = as_iteration_count(&value).map_err(|e| e.to_string())?;

        if let Some(max) = block.max_iterations.filter(|m| *m > 0) {
            count = count.min(u64::from(max));
        }
        let hard_cap = self.config().max_for_iterations;
        if count > hard_cap {
            warn!("for loop count {} capped at {}", count, hard_cap);
            count = hard_cap;
        }

        debug!("for loop running {} iteration(s)", count);
        for index in 0..count {
            if self.is_cancelled() {
                nested.absorb(StepsOutcome::interrupted(EngineError::Cancelled.to_string()));
                return Err(EngineError::Cancelled.to_string());
            }
            self.set_loop_position(index);

            let outcome = self.execute_steps(&block.steps).await;
            let failure = outcome.failure_message();
            nested.absorb(outcome);
            if let Some(message) = failure {
                return Err(format!("iteration {}: {}", index + 1, message));
            }
        }
        Ok(Value::from(count))
    }

    async fn run_while(&self, block: &LoopBlock, nested: &mut StepsOutcome) -> Result<Value, String> {
        let max = block
            .max_iterations
            .filter(|m| *m > 0)
            .unwrap_or(self.config().max_while_iterations);

        let mut iterations: u32 = 0;
        loop {
            if self.is_cancelled() {
                nested.absorb(StepsOutcome::interrupted(EngineError::Cancelled.to_string()));
                return Err(EngineError::Cancelled.to_string());
            }

            let condition = self.evaluate("while", &block.condition).await.map_err(|e| e.to_string())?;
            if !is_true(&condition) {
                break;
            }
            if iterations >= max {
                return Err(EngineError::RunawayLoop(max).to_string());
            }
            self.set_loop_position(u64::from(iterations));

            let outcome = self.execute_steps(&block.steps).await;
            let failure = outcome.failure_message();
            nested.absorb(outcome);
            if let Some(message) = failure {
                return Err(format!("iteration {}: {}", iterations + 1, message));
            }
            iterations += 1;
        }

        debug!("while loop finished after {} iteration(s)", iterations);
        Ok(Value::from(iterations))
    }

    fn set_loop_position(&self, index: u64) {
        self.variables().set(ITERATION_VARIABLE, Value::from(index + 1));
        self.variables().set(INDEX_VARIABLE, Value::from(index));
    }
}
