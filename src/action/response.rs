//! Action error types

use std::time::Duration;
use thiserror::Error;

/// Error types for action operations
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("action timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("action cancelled")]
    Cancelled,
}
