//! Step executor contract.
//!
//! Concrete pipeline steps (app-slot setup, container resize, route swap,
//! approvals) live outside this crate; they implement [`Step`] and are looked
//! up by step type through the [`StepRegistry`]. The engine never inspects
//! step-specific payloads beyond status, outcomes, and failure info.

use crate::ambiance::Ambiance;
use crate::error::{RegistryError, StepError};
use crate::execution::StepResponse;
use crate::plan::Plan;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What starting a step produced.
#[derive(Clone)]
pub enum StepStart {
    /// The step completed within the call.
    Sync(StepResponse),
    /// The step registered external work; resume arrives on `callback_id`.
    Async { callback_id: String },
    /// The step dispatched a task to an external runner; completion arrives
    /// on `correlation_id`.
    Task { correlation_id: String },
    /// The step spawns a nested plan; the node waits for the chain to end.
    Child { plan: Arc<Plan> },
}

/// Contract implemented by step executors.
#[async_trait]
pub trait Step: Send + Sync {
    /// Begin the step with its resolved parameters.
    async fn start(
        &self,
        ambiance: &Ambiance,
        resolved_parameters: &Value,
    ) -> Result<StepStart, StepError>;

    /// Re-invoked when a correlated external event arrives for a waiting
    /// node. `responses` maps correlation ids to their payloads.
    async fn resume(
        &self,
        ambiance: &Ambiance,
        responses: HashMap<String, Value>,
    ) -> Result<StepResponse, StepError>;
}

/// Registry of step executors keyed by step type.
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        step_type: impl Into<String>,
        step: Arc<dyn Step>,
    ) -> Result<(), RegistryError> {
        let step_type = step_type.into();
        if self.steps.contains_key(&step_type) {
            return Err(RegistryError::DuplicateStep(step_type));
        }
        self.steps.insert(step_type, step);
        Ok(())
    }

    pub fn obtain(&self, step_type: &str) -> Result<Arc<dyn Step>, RegistryError> {
        self.steps
            .get(step_type)
            .cloned()
            .ok_or_else(|| RegistryError::StepNotFound(step_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.steps.keys().cloned().collect()
    }
}

/// Expression-resolution collaborator. Raw step parameters may carry
/// expressions against the execution trace; resolution happens just before
/// facilitation and may fail on unresolved required expressions.
#[async_trait]
pub trait ExpressionResolver: Send + Sync {
    async fn resolve(
        &self,
        ambiance: &Ambiance,
        raw: &Value,
        skip_unresolved_check: bool,
    ) -> Result<Value, StepError>;
}

/// Pass-through resolver for plans whose parameters carry no expressions.
#[derive(Debug, Default)]
pub struct NoopResolver;

#[async_trait]
impl ExpressionResolver for NoopResolver {
    async fn resolve(
        &self,
        _ambiance: &Ambiance,
        raw: &Value,
        _skip_unresolved_check: bool,
    ) -> Result<Value, StepError> {
        Ok(raw.clone())
    }
}
