//! Execution engine: runs step lists against an action executor

pub mod control;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expect;
pub mod retry;
pub mod scheduler;

pub use engine::{
    EngineConfig, EventHandler, ExecutionEngine, ExecutionEvent, SuiteOptions,
    DEFAULT_UNSAFE_ACTIONS,
};
pub use error::EngineError;
pub use executor::{StepExecutor, StepsOutcome};
pub use scheduler::{plan_groups, required_variables, SchedulingStrategy};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
