//! Engine-level errors

use thiserror::Error;

/// Errors raised by the interpreter itself rather than by an action
#[derive(Debug, Error)]
pub enum EngineError {
    /// A condition or iteration count could not be evaluated
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("while loop exceeded the maximum of {0} iterations")]
    RunawayLoop(u32),

    /// Variable or secret initialization failed
    #[error("{0}")]
    Variables(String),

    #[error("execution cancelled")]
    Cancelled,
}
