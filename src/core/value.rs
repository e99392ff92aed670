//! Dynamic value helpers
//!
//! Step arguments, options, outputs and variables are all `serde_json::Value`.
//! This module holds the conversion rules applied at the engine's boundaries.

pub use serde_json::Value;

use crate::execution::EngineError;

/// Render a value the way it appears when substituted into text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Containers render as compact JSON so they can be re-parsed downstream
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Coerce a control-flow evaluation result to a boolean.
///
/// Only a `true` boolean or the exact string `"true"` count as true.
pub fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

/// Interpret an evaluation result as a loop iteration count
pub fn as_iteration_count(value: &Value) -> Result<u64, EngineError> {
    let count = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
        }
        _ => None,
    };

    match count {
        Some(n) => Ok(n.max(0) as u64),
        None => Err(EngineError::Evaluation(format!(
            "expected an iteration count, got {}",
            stringify(value)
        ))),
    }
}

/// Parse a JSON-encoded string into a container value, if it is one
pub fn parse_json_container(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

/// Read an HTTP-like status code from a structured action response
pub fn status_code(value: &Value) -> Option<u16> {
    let field = match value {
        Value::Object(map) => map.get("status_code"),
        Value::String(s) => {
            return parse_json_container(s).as_ref().and_then(status_code);
        }
        _ => None,
    }?;

    match field {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
