//! Execution scheduler - partitions step lists into parallel groups
//!
//! Groups run one after another; steps inside a group run concurrently. A new
//! group starts whenever a step reads or overwrites a variable the pending
//! group writes, reads the step history, or is unsafe to run alongside
//! anything else (control blocks and denylisted actions).

use crate::{
    action::ActionExecutor,
    core::{
        step::{SkipCondition, Step},
        variables::{referenced_variables, referenced_variables_in, HISTORY_VARIABLE},
    },
    execution::{
        error::EngineError,
        executor::{StepExecutor, StepsOutcome},
    },
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in order, one at a time
    #[default]
    Sequential,

    /// Execute every step of a parallel group at once
    Parallel,

    /// Limited parallelism (max N concurrent steps per group)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Concurrency bound for a group of `group_len` steps
    pub fn max_concurrency(&self, group_len: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => group_len.max(1),
            SchedulingStrategy::LimitedParallel(max) => (*max).clamp(1, group_len.max(1)),
        }
    }
}

/// Every variable base name a step reads: arguments, options, skip and
/// control conditions, and (for control blocks) everything nested
pub fn required_variables(step: &Step) -> HashSet<String> {
    let mut required = HashSet::new();
    collect_required(step, &mut required);
    required
}

fn collect_required(step: &Step, into: &mut HashSet<String>) {
    step.args.iter().for_each(|arg| referenced_variables_in(arg, into));
    step.options.values().for_each(|opt| referenced_variables_in(opt, into));
    if let Some(SkipCondition::Expr(expr)) = &step.skip {
        into.extend(referenced_variables(expr));
    }
    if let Some(block) = &step.control {
        into.extend(referenced_variables(block.condition()));
        block.nested_steps().for_each(|nested| collect_required(nested, into));
    }
}

/// Steps that must run alone in their group
fn is_parallel_safe(step: &Step, unsafe_actions: &HashSet<String>) -> bool {
    step.control.is_none() && !unsafe_actions.contains(&step.action)
}

/// Partition `steps` into ordered groups of indices.
///
/// Order is preserved: concatenating the groups yields `0..steps.len()`.
pub fn plan_groups(steps: &[Step], unsafe_actions: &HashSet<String>) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut written: HashSet<String> = HashSet::new();
    let mut read: HashSet<String> = HashSet::new();
    let mut current_is_exclusive = false;

    for (index, step) in steps.iter().enumerate() {
        let required = required_variables(step);
        let safe = is_parallel_safe(step, unsafe_actions);

        let conflicts = !required.is_disjoint(&written)
            || step
                .result
                .as_ref()
                .is_some_and(|r| written.contains(r) || read.contains(r))
            || required.contains(HISTORY_VARIABLE);

        if !current.is_empty() && (!safe || current_is_exclusive || conflicts) {
            groups.push(std::mem::take(&mut current));
            written.clear();
            read.clear();
        }

        current.push(index);
        if let Some(result) = &step.result {
            written.insert(result.clone());
        }
        read.extend(required);
        current_is_exclusive = !safe;
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Run a step list group by group
pub(crate) async fn execute_parallel<A: ActionExecutor + 'static>(
    executor: &StepExecutor<A>,
    steps: &[Step],
) -> StepsOutcome {
    let groups = plan_groups(steps, &executor.config().unsafe_actions);
    debug!("Planned {} group(s) for {} step(s)", groups.len(), steps.len());

    let mut outcome = StepsOutcome::default();
    for group in groups {
        if executor.is_cancelled() {
            warn!("Execution cancelled before parallel group {:?}", group);
            outcome.absorb(StepsOutcome::interrupted(EngineError::Cancelled.to_string()));
            break;
        }

        let group_outcome = match group.as_slice() {
            [single] => executor.execute_step(&steps[*single]).await,
            _ => execute_group(executor, steps, &group).await,
        };
        outcome.absorb(group_outcome);
        if outcome.failed {
            break;
        }
    }
    outcome
}

/// Run one group concurrently, bounded by a semaphore and the group deadline
async fn execute_group<A: ActionExecutor + 'static>(
    executor: &StepExecutor<A>,
    steps: &[Step],
    group: &[usize],
) -> StepsOutcome {
    let config = executor.config();
    let limit = config.strategy.max_concurrency(group.len());
    debug!("Running group of {} step(s), concurrency {}", group.len(), limit);

    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + config.group_timeout;
    let semaphore = Arc::new(Semaphore::new(limit));
    let abort = Arc::new(AtomicBool::new(false));

    let mut handles: Vec<(usize, JoinHandle<StepsOutcome>)> = Vec::with_capacity(group.len());
    let mut not_started: Vec<(usize, &'static str)> = Vec::new();

    for &index in group {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit.ok(),
            _ = tokio::time::sleep_until(deadline) => None,
            _ = executor.cancel_token().cancelled() => None,
        };

        let reason = match &permit {
            None if executor.is_cancelled() => Some("execution cancelled"),
            None => Some("parallel group deadline exceeded"),
            Some(_) if abort.load(Ordering::SeqCst) => Some("an earlier step in the group failed"),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            not_started.push((index, reason));
            continue;
        }

        let step = steps[index].clone();
        let worker = executor.clone();
        let abort = abort.clone();
        handles.push((
            index,
            tokio::spawn(async move {
                let outcome = worker.execute_step(&step).await;
                if outcome.failed {
                    abort.store(true, Ordering::SeqCst);
                }
                drop(permit);
                outcome
            }),
        ));
    }

    let mut by_index: BTreeMap<usize, StepsOutcome> = BTreeMap::new();
    for (index, mut handle) in handles {
        let step = &steps[index];
        let collected = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => {
                error!("Step '{}' task failed: {}", step.name, join_error);
                StepsOutcome::single(executor.failed_result(
                    step,
                    format!("step task failed: {}", join_error),
                    started,
                ))
            }
            Err(_) => {
                handle.abort();
                error!(
                    "Step '{}' did not finish within the group deadline of {:?}",
                    step.name, config.group_timeout
                );
                StepsOutcome::single(executor.failed_result(
                    step,
                    format!(
                        "timed out after {} waiting for the parallel group",
                        humantime::format_duration(config.group_timeout)
                    ),
                    started,
                ))
            }
        };
        by_index.insert(index, collected);
    }

    for (index, reason) in not_started {
        let step = &steps[index];
        debug!("Step '{}' not started: {}", step.name, reason);
        by_index.insert(
            index,
            StepsOutcome::single(executor.skipped_result(step, format!("not started: {}", reason))),
        );
    }

    let mut outcome = StepsOutcome::default();
    for (_, collected) in by_index {
        outcome.absorb(collected);
    }
    if executor.is_cancelled() && outcome.interrupted.is_none() {
        outcome.absorb(StepsOutcome::interrupted(EngineError::Cancelled.to_string()));
    }
    outcome
}
