//! Adviser-response handlers.
//!
//! Each [`AdviserResponse`] type maps to exactly one handler through an
//! explicit registry populated at engine construction. Handlers produce one
//! terminal effect: trigger a sibling, re-trigger the node as a retry, mark
//! it succeeded, park it for manual intervention, or end the chain.

use super::OrchestrationEngine;
use crate::advise::{AdviserResponse, AdviserResponseType};
use crate::ambiance::Ambiance;
use crate::error::{EngineError, EngineResult, RegistryError};
use crate::execution::{NodeExecution, Status};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub(crate) trait AdviseHandler: Send + Sync {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        ambiance: &Ambiance,
        node_execution: &NodeExecution,
        response: AdviserResponse,
    ) -> EngineResult<()>;
}

/// Map from response type to handler. Missing keys are configuration errors.
pub(crate) struct AdviseHandlerRegistry {
    handlers: HashMap<AdviserResponseType, Arc<dyn AdviseHandler>>,
}

impl AdviseHandlerRegistry {
    pub(crate) fn standard() -> Self {
        let mut handlers: HashMap<AdviserResponseType, Arc<dyn AdviseHandler>> = HashMap::new();
        handlers.insert(AdviserResponseType::NextStep, Arc::new(NextStepHandler));
        handlers.insert(AdviserResponseType::Retry, Arc::new(RetryHandler));
        handlers.insert(AdviserResponseType::MarkSuccess, Arc::new(MarkSuccessHandler));
        handlers.insert(
            AdviserResponseType::InterventionWait,
            Arc::new(InterventionWaitHandler),
        );
        handlers.insert(AdviserResponseType::EndPlan, Arc::new(EndChainHandler));
        handlers.insert(AdviserResponseType::Rollback, Arc::new(RollbackHandler));
        handlers.insert(AdviserResponseType::Unknown, Arc::new(EndChainHandler));
        Self { handlers }
    }

    pub(crate) fn obtain(
        &self,
        response_type: AdviserResponseType,
    ) -> Result<Arc<dyn AdviseHandler>, RegistryError> {
        self.handlers
            .get(&response_type)
            .cloned()
            .ok_or_else(|| RegistryError::AdviseHandlerNotFound(response_type.to_string()))
    }
}

/// Trigger the sibling node the adviser named.
struct NextStepHandler;

#[async_trait]
impl AdviseHandler for NextStepHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        ambiance: &Ambiance,
        _node_execution: &NodeExecution,
        response: AdviserResponse,
    ) -> EngineResult<()> {
        let AdviserResponse::NextStep { next_node_id } = response else {
            return Ok(());
        };
        let node = engine
            .fetch_plan_node(&ambiance.plan_execution_id, &next_node_id)
            .ok_or(EngineError::PlanNodeNotFound(next_node_id))?;
        engine.trigger_node(ambiance, node).await?;
        Ok(())
    }
}

/// Re-trigger the same plan node with the retry chain extended.
struct RetryHandler;

#[async_trait]
impl AdviseHandler for RetryHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        _ambiance: &Ambiance,
        node_execution: &NodeExecution,
        response: AdviserResponse,
    ) -> EngineResult<()> {
        let wait = match response {
            AdviserResponse::Retry { wait } => wait,
            _ => None,
        };
        engine
            .retry_node_execution(&node_execution.uuid, wait)
            .await
    }
}

/// Conclude the node `Succeeded` despite its failure, then proceed or end.
struct MarkSuccessHandler;

/// Sources a post-conclusion override may rewrite. These are the only
/// non-obvious hops the engine sanctions.
const OVERRIDABLE_FAILURES: [Status; 3] = [Status::Failed, Status::Errored, Status::Expired];

#[async_trait]
impl AdviseHandler for MarkSuccessHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        ambiance: &Ambiance,
        node_execution: &NodeExecution,
        response: AdviserResponse,
    ) -> EngineResult<()> {
        let next_node_id = match response {
            AdviserResponse::MarkSuccess { next_node_id } => next_node_id,
            _ => None,
        };
        let updated = engine
            .conclude_node_execution(
                &node_execution.uuid,
                Status::Succeeded,
                Some(&OVERRIDABLE_FAILURES),
                None,
            )
            .await?;
        let Some(updated) = updated else {
            // Lost a race with another finalizer; nothing left to do.
            return Ok(());
        };
        match next_node_id {
            Some(next_node_id) => {
                let node = engine
                    .fetch_plan_node(&ambiance.plan_execution_id, &next_node_id)
                    .ok_or(EngineError::PlanNodeNotFound(next_node_id))?;
                engine.trigger_node(ambiance, node).await?;
            }
            None => engine.end_transition(&updated).await?,
        }
        Ok(())
    }
}

/// Park the node awaiting manual intervention.
struct InterventionWaitHandler;

#[async_trait]
impl AdviseHandler for InterventionWaitHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        _ambiance: &Ambiance,
        node_execution: &NodeExecution,
        _response: AdviserResponse,
    ) -> EngineResult<()> {
        let updated = engine
            .conclude_node_execution(
                &node_execution.uuid,
                Status::InterventionWaiting,
                Some(&OVERRIDABLE_FAILURES),
                None,
            )
            .await?;
        if updated.is_none() {
            tracing::info!(node_execution_id = %node_execution.uuid,
                "intervention wait skipped: node already finalized elsewhere");
        }
        Ok(())
    }
}

/// End the chain: notify the waiting parent or conclude the plan.
struct EndChainHandler;

#[async_trait]
impl AdviseHandler for EndChainHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        _ambiance: &Ambiance,
        node_execution: &NodeExecution,
        _response: AdviserResponse,
    ) -> EngineResult<()> {
        engine.end_transition(node_execution).await
    }
}

/// Rollback advice ends the current chain; the rollback plan itself is
/// compiled upstream and started as its own execution.
struct RollbackHandler;

#[async_trait]
impl AdviseHandler for RollbackHandler {
    async fn handle(
        &self,
        engine: &OrchestrationEngine,
        _ambiance: &Ambiance,
        node_execution: &NodeExecution,
        _response: AdviserResponse,
    ) -> EngineResult<()> {
        tracing::info!(node_execution_id = %node_execution.uuid,
            "rollback advised: ending current chain");
        engine.end_transition(node_execution).await
    }
}
