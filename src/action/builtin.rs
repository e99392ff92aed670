//! Built-in actions available without any external executor

use crate::action::{
    expression::{evaluate_bool, evaluate_count},
    ActionError, ActionExecutor, ActionRequest, CONTROL_ACTION, LOG_ACTION,
};
use crate::core::value::{stringify, Value};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Executor for the built-in action set
///
/// | action          | behavior                                              |
/// |-----------------|-------------------------------------------------------|
/// | `control`       | evaluates `if`/`while` booleans and `for` counts      |
/// | `echo`          | returns its argument (or the argument list)           |
/// | `log`           | joins its arguments with spaces (the step logs it)    |
/// | `sleep`         | waits for milliseconds or a duration like `"250ms"`   |
/// | `fail`          | always fails with the given message                   |
/// | `assert_equals` | fails unless both arguments are equal                 |
/// | `json`          | parses a JSON string into a value                     |
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinActions;

impl BuiltinActions {
    pub fn new() -> Self {
        Self
    }

    fn control(request: &ActionRequest) -> Result<Value, ActionError> {
        let (Some(kind), Some(condition)) = (request.arg_str(0), request.args.get(1)) else {
            return Err(ActionError::InvalidArguments(
                "control expects [kind, condition]".to_string(),
            ));
        };
        let condition = stringify(condition);

        match kind {
            "if" | "while" => evaluate_bool(&condition).map(Value::Bool),
            "for" => evaluate_count(&condition).map(Value::from),
            other => Err(ActionError::InvalidArguments(format!(
                "unknown control operator: {}",
                other
            ))),
        }
    }

    fn echo(request: &ActionRequest) -> Value {
        match request.args.as_slice() {
            [] => Value::Null,
            [single] => single.clone(),
            many => Value::Array(many.to_vec()),
        }
    }

    fn log(request: &ActionRequest) -> Value {
        let message = request
            .args
            .iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join(" ");
        Value::String(message)
    }

    async fn sleep(cancel: &CancellationToken, request: &ActionRequest) -> Result<Value, ActionError> {
        let duration = match request.args.first() {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| ActionError::InvalidArguments(format!("invalid sleep duration: {}", n)))?,
            Some(Value::String(s)) => humantime::parse_duration(s.trim())
                .or_else(|_| s.trim().parse::<u64>().map(Duration::from_millis))
                .map_err(|_| ActionError::InvalidArguments(format!("invalid sleep duration: {}", s)))?,
            _ => {
                return Err(ActionError::InvalidArguments(
                    "sleep expects a duration".to_string(),
                ))
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ActionError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(Value::from(duration.as_millis() as u64)),
        }
    }

    fn fail(request: &ActionRequest) -> ActionError {
        match request.args.first() {
            Some(message) => ActionError::Failed(stringify(message)),
            None => ActionError::Failed("fail action invoked".to_string()),
        }
    }

    fn assert_equals(request: &ActionRequest) -> Result<Value, ActionError> {
        let [expected, actual] = request.args.as_slice() else {
            return Err(ActionError::InvalidArguments(
                "assert_equals expects [expected, actual]".to_string(),
            ));
        };
        if expected == actual || stringify(expected) == stringify(actual) {
            Ok(Value::Bool(true))
        } else {
            Err(ActionError::Failed(format!(
                "assertion failed: expected {}, got {}",
                stringify(expected),
                stringify(actual)
            )))
        }
    }

    fn json(request: &ActionRequest) -> Result<Value, ActionError> {
        match request.args.first() {
            Some(Value::String(text)) => serde_json::from_str(text)
                .map_err(|e| ActionError::InvalidArguments(format!("invalid JSON: {}", e))),
            Some(other) => Ok(other.clone()),
            None => Err(ActionError::InvalidArguments(
                "json expects one argument".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ActionExecutor for BuiltinActions {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &ActionRequest,
    ) -> Result<Value, ActionError> {
        match request.action.as_str() {
            CONTROL_ACTION => Self::control(request),
            "echo" => Ok(Self::echo(request)),
            LOG_ACTION => Ok(Self::log(request)),
            "sleep" => Self::sleep(cancel, request).await,
            "fail" => Err(Self::fail(request)),
            "assert_equals" => Self::assert_equals(request),
            "json" => Self::json(request),
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}
