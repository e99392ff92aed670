//! Action execution contract
//!
//! The engine never interprets action names itself: every plain step and
//! every control-block condition is dispatched through [`ActionExecutor`].

pub mod builtin;
pub mod expression;
pub mod response;

use crate::core::value::{is_true, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use builtin::BuiltinActions;
pub use response::ActionError;

/// Action name used to evaluate `if`/`for`/`while` conditions
pub const CONTROL_ACTION: &str = "control";

/// Built-in action whose output the executor writes to the log, masked
pub const LOG_ACTION: &str = "log";

/// A fully substituted action invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action: String,
    pub args: Vec<Value>,
    pub options: HashMap<String, Value>,
    /// Suppress the executor's own logging
    pub silent: bool,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            args,
            options: HashMap::new(),
            silent: false,
        }
    }

    /// Condition evaluation request: `control(kind, condition)`, always silent
    pub fn control(kind: &str, condition: impl Into<String>) -> Self {
        Self {
            silent: true,
            ..Self::new(
                CONTROL_ACTION,
                vec![Value::String(kind.to_string()), Value::String(condition.into())],
            )
        }
    }

    /// Attach options; `silent` is read from the options map
    pub fn with_options(mut self, options: HashMap<String, Value>) -> Self {
        self.silent = options.get("silent").is_some_and(is_true);
        self.options = options;
        self
    }

    /// Positional argument as text, if present
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }
}

/// Trait for action execution - allows for different implementations
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run one action invocation; implementations should honor `cancel`
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &ActionRequest,
    ) -> Result<Value, ActionError>;
}

#[async_trait]
impl<T: ActionExecutor + ?Sized> ActionExecutor for Arc<T> {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &ActionRequest,
    ) -> Result<Value, ActionError> {
        (**self).execute(cancel, request).await
    }
}
