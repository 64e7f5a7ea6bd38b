//! Registry configuration errors.
//!
//! Registries are populated once at process start; an unregistered or
//! duplicate key is a configuration mistake, not a runtime retry condition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No facilitator registered for step type: {0}")]
    FacilitatorNotFound(String),
    #[error("Duplicate facilitator registration for step type: {0}")]
    DuplicateFacilitator(String),
    #[error("No step registered for step type: {0}")]
    StepNotFound(String),
    #[error("Duplicate step registration for step type: {0}")]
    DuplicateStep(String),
    #[error("No adviser registered for adviser type: {0}")]
    AdviserNotFound(String),
    #[error("Duplicate adviser registration for adviser type: {0}")]
    DuplicateAdviser(String),
    #[error("No handler registered for adviser response type: {0}")]
    AdviseHandlerNotFound(String),
}
