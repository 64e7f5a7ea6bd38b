//! Top-level engine error type.

use super::{RegistryError, StepError, StoreError};
use thiserror::Error;

/// Errors raised while driving a plan execution.
///
/// Inside the engine these are always caught at the operation boundary and
/// converted into a synthetic `Failed` step response; they only escape to the
/// caller from the public entry points (`start_plan_execution`, interrupt
/// registration).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot start execution for empty plan: {0}")]
    EmptyPlan(String),
    #[error("Plan node not found: {0}")]
    PlanNodeNotFound(String),
    #[error("Ambiance carries no current runtime id")]
    NoCurrentRuntimeId,
    #[error("Interrupt rejected: {0}")]
    InterruptRejected(String),
    #[error("Engine dispatch queue closed")]
    DispatchClosed,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
