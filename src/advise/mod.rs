//! Advisers — pluggable policies deciding what happens after a node concludes.
//!
//! Each plan node carries an ordered list of adviser obtainments. When the
//! node's step concludes, the engine builds an [`AdvisingEvent`] (carrying the
//! *pre-conclusion* status, so an adviser can distinguish "was running and
//! just failed" from other transitions) and evaluates the advisers in
//! declaration order until one produces a definitive [`AdviserResponse`].
//! The response is dispatched through a type-keyed handler registry in the
//! engine.

pub mod builtin;

pub use builtin::{
    IgnoreFailureAdviser, ManualInterventionAdviser, OnFailRetryAdviser, OnSuccessAdviser,
};

use crate::ambiance::Ambiance;
use crate::error::RegistryError;
use crate::execution::{FailureInfo, Status, StepOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What an adviser decided. Exactly one terminal effect per response,
/// applied by the handler registered for its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// Trigger the named sibling node next.
    NextStep { next_node_id: String },
    /// Re-trigger the same plan node, extending the retry chain.
    Retry {
        #[serde(default, with = "crate::plan::opt_duration_secs")]
        wait: Option<Duration>,
    },
    /// Conclude the node `Succeeded` despite its failure, then proceed or
    /// end.
    MarkSuccess { next_node_id: Option<String> },
    /// Park the node awaiting manual intervention; an interrupt resumes it.
    InterventionWait,
    /// End the whole chain.
    EndPlan,
    /// End the current chain so an upstream-compiled rollback plan can run.
    Rollback,
    /// No adviser fired; the node ends with no further advisement.
    Unknown,
}

/// Discriminant used as the handler-registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponseType {
    NextStep,
    Retry,
    MarkSuccess,
    InterventionWait,
    EndPlan,
    Rollback,
    Unknown,
}

impl AdviserResponse {
    pub fn response_type(&self) -> AdviserResponseType {
        match self {
            AdviserResponse::NextStep { .. } => AdviserResponseType::NextStep,
            AdviserResponse::Retry { .. } => AdviserResponseType::Retry,
            AdviserResponse::MarkSuccess { .. } => AdviserResponseType::MarkSuccess,
            AdviserResponse::InterventionWait => AdviserResponseType::InterventionWait,
            AdviserResponse::EndPlan => AdviserResponseType::EndPlan,
            AdviserResponse::Rollback => AdviserResponseType::Rollback,
            AdviserResponse::Unknown => AdviserResponseType::Unknown,
        }
    }
}

impl std::fmt::Display for AdviserResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AdviserResponseType::NextStep => "NEXT_STEP",
            AdviserResponseType::Retry => "RETRY",
            AdviserResponseType::MarkSuccess => "MARK_SUCCESS",
            AdviserResponseType::InterventionWait => "INTERVENTION_WAIT",
            AdviserResponseType::EndPlan => "END_PLAN",
            AdviserResponseType::Rollback => "ROLLBACK",
            AdviserResponseType::Unknown => "UNKNOWN",
        };
        f.write_str(text)
    }
}

/// Everything an adviser may inspect. Advisers are stateless policy objects;
/// they never mutate persisted state themselves.
#[derive(Debug, Clone)]
pub struct AdvisingEvent {
    pub ambiance: Ambiance,
    /// Status the node held *before* the concluding update.
    pub from_status: Status,
    /// Status the step reported.
    pub status: Status,
    pub outcomes: Vec<StepOutcome>,
    pub failure_info: Option<FailureInfo>,
    /// Obtainment-specific configuration for the adviser under evaluation.
    pub adviser_parameters: Value,
    /// How many earlier attempts the concluding execution retries.
    pub retry_count: usize,
}

/// Policy invoked after a node concludes. Returning `None` declines; the
/// engine then asks the next adviser in declaration order.
#[async_trait]
pub trait Adviser: Send + Sync {
    async fn on_advise_event(&self, event: &AdvisingEvent) -> Option<AdviserResponse>;
}

/// Registry of advisers keyed by adviser type tag. Populated once at process
/// start; duplicate or missing keys are configuration errors.
#[derive(Default)]
pub struct AdviserRegistry {
    advisers: HashMap<String, Arc<dyn Adviser>>,
}

impl AdviserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        adviser_type: impl Into<String>,
        adviser: Arc<dyn Adviser>,
    ) -> Result<(), RegistryError> {
        let adviser_type = adviser_type.into();
        if self.advisers.contains_key(&adviser_type) {
            return Err(RegistryError::DuplicateAdviser(adviser_type));
        }
        self.advisers.insert(adviser_type, adviser);
        Ok(())
    }

    pub fn obtain(&self, adviser_type: &str) -> Result<Arc<dyn Adviser>, RegistryError> {
        self.advisers
            .get(adviser_type)
            .cloned()
            .ok_or_else(|| RegistryError::AdviserNotFound(adviser_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.advisers.keys().cloned().collect()
    }
}

/// Registry with the built-in advisers pre-registered under their canonical
/// type tags.
pub fn default_adviser_registry() -> AdviserRegistry {
    let mut registry = AdviserRegistry::new();
    // Fresh registry; registrations cannot collide.
    registry
        .register("on-success", Arc::new(OnSuccessAdviser))
        .expect("empty registry");
    registry
        .register("on-fail-retry", Arc::new(OnFailRetryAdviser))
        .expect("empty registry");
    registry
        .register("manual-intervention", Arc::new(ManualInterventionAdviser))
        .expect("empty registry");
    registry
        .register("ignore-failure", Arc::new(IgnoreFailureAdviser))
        .expect("empty registry");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdviser;

    #[async_trait]
    impl Adviser for NoopAdviser {
        async fn on_advise_event(&self, _event: &AdvisingEvent) -> Option<AdviserResponse> {
            None
        }
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = AdviserRegistry::new();
        registry.register("noop", Arc::new(NoopAdviser)).unwrap();
        assert!(matches!(
            registry.register("noop", Arc::new(NoopAdviser)),
            Err(RegistryError::DuplicateAdviser(_))
        ));
    }

    #[test]
    fn test_obtain_unregistered_is_an_error() {
        let registry = AdviserRegistry::new();
        assert!(matches!(
            registry.obtain("missing"),
            Err(RegistryError::AdviserNotFound(_))
        ));
    }

    #[test]
    fn test_response_type_serde_tagging() {
        let response = AdviserResponse::NextStep {
            next_node_id: "n2".to_string(),
        };
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("\"NEXT_STEP\""));
        let back: AdviserResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.response_type(), AdviserResponseType::NextStep);
    }
}
