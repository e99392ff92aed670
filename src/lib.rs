//! stepflow - a declarative test-automation step engine

pub mod action;
pub mod cli;
pub mod core;
pub mod execution;

// Re-export commonly used types
pub use crate::action::{ActionError, ActionExecutor, ActionRequest, BuiltinActions};
pub use crate::core::{
    config::TestCaseConfig, Step, StepResult, StepStatus, SuiteResult, TestCase, TestResult,
    TestStatus, Value, VariableStore,
};
pub use crate::execution::{
    EngineConfig, EngineError, ExecutionEngine, ExecutionEvent, SchedulingStrategy, SuiteOptions,
};
