//! Persistence-layer error types.

use thiserror::Error;

/// Errors surfaced by the node/plan/interrupt stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node execution not found: {0}")]
    NodeExecutionNotFound(String),
    #[error("Plan execution not found: {0}")]
    PlanExecutionNotFound(String),
    #[error("Interrupt not found: {0}")]
    InterruptNotFound(String),
    #[error("Duplicate record id: {0}")]
    DuplicateId(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}
