//! Errors raised by step executors and expression resolution.

use thiserror::Error;

/// Step-level errors. Converted into a synthetic `Failed` step response at
/// the engine boundary, never propagated past it.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Step does not support resume: {0}")]
    ResumeUnsupported(String),
    #[error("Unresolved expression in step parameters: {0}")]
    UnresolvedExpression(String),
    #[error("Invalid step parameters: {0}")]
    InvalidParameters(String),
    #[error("Task dispatch failed: {0}")]
    DispatchFailed(String),
}
