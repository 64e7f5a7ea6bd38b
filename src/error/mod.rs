//! Error types for the orchestration engine.
//!
//! - [`EngineError`] — Top-level errors raised while driving a plan execution.
//! - [`StoreError`] — Persistence-layer errors.
//! - [`StepError`] — Errors raised by step executors and expression resolution.
//! - [`RegistryError`] — Configuration errors from facilitator/adviser registries.

pub mod engine_error;
pub mod registry_error;
pub mod step_error;
pub mod store_error;

pub use engine_error::EngineError;
pub use registry_error::RegistryError;
pub use step_error::StepError;
pub use store_error::StoreError;

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for store-level results.
pub type StoreResult<T> = Result<T, StoreError>;
