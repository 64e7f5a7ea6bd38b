//! Interrupt registration and application.

use super::{Interrupt, InterruptState, InterruptType};
use crate::engine::dispatch::{DispatchSender, EngineCmd};
use crate::error::{EngineError, EngineResult};
use crate::execution::Status;
use crate::store::{InterruptStore, NodeExecutionStore, PlanExecutionStore};
use std::sync::Arc;

/// Registers interrupts and applies them against the stores through the
/// same conditional-update primitive the engine itself uses. Chain
/// continuation after an applied interrupt goes through the engine's
/// dispatch queue, never by direct call.
pub struct InterruptService {
    interrupt_store: Arc<dyn InterruptStore>,
    node_store: Arc<dyn NodeExecutionStore>,
    plan_store: Arc<dyn PlanExecutionStore>,
    dispatch: DispatchSender,
}

impl InterruptService {
    pub(crate) fn new(
        interrupt_store: Arc<dyn InterruptStore>,
        node_store: Arc<dyn NodeExecutionStore>,
        plan_store: Arc<dyn PlanExecutionStore>,
        dispatch: DispatchSender,
    ) -> Self {
        Self {
            interrupt_store,
            node_store,
            plan_store,
            dispatch,
        }
    }

    /// Validate, persist, and apply an interrupt. Validation failures are
    /// returned to the caller; application failures after registration are
    /// non-fatal and survive only as the record's
    /// `ProcessedUnsuccessfully` state.
    pub async fn register(
        &self,
        interrupt_type: InterruptType,
        plan_execution_id: &str,
        node_execution_id: Option<String>,
        issued_by: impl Into<String>,
    ) -> EngineResult<Interrupt> {
        self.validate(interrupt_type, node_execution_id.as_deref())?;
        let plan_execution = self.plan_store.get(plan_execution_id).await?;

        let interrupt = self
            .interrupt_store
            .save(Interrupt::new(
                interrupt_type,
                plan_execution_id,
                node_execution_id,
                issued_by,
            ))
            .await?;
        tracing::info!(interrupt_id = %interrupt.uuid, ?interrupt_type,
            plan_execution_id = %plan_execution_id, "interrupt registered");

        // Anything registered against an already-finished plan is recorded
        // and then dropped, so repeated aborts stay idempotent.
        if plan_execution.is_terminal() {
            tracing::info!(interrupt_id = %interrupt.uuid,
                status = %plan_execution.status,
                "plan execution already concluded; interrupt is a no-op");
            return self
                .interrupt_store
                .update_state(&interrupt.uuid, InterruptState::Processed)
                .await
                .map_err(EngineError::from);
        }

        let interrupt = self
            .interrupt_store
            .update_state(&interrupt.uuid, InterruptState::Processing)
            .await?;
        let outcome = self.apply(&interrupt).await;
        let final_state = match &outcome {
            Ok(()) => InterruptState::Processed,
            Err(error) => {
                tracing::warn!(interrupt_id = %interrupt.uuid, %error,
                    "interrupt application failed");
                InterruptState::ProcessedUnsuccessfully
            }
        };
        self.interrupt_store
            .update_state(&interrupt.uuid, final_state)
            .await
            .map_err(EngineError::from)
    }

    /// The persisted log for a plan run, oldest first.
    pub async fn fetch_log(&self, plan_execution_id: &str) -> EngineResult<Vec<Interrupt>> {
        self.interrupt_store
            .fetch_by_plan_execution(plan_execution_id)
            .await
            .map_err(EngineError::from)
    }

    fn validate(
        &self,
        interrupt_type: InterruptType,
        node_execution_id: Option<&str>,
    ) -> EngineResult<()> {
        let needs_node = matches!(
            interrupt_type,
            InterruptType::Abort | InterruptType::Retry | InterruptType::Expire
        );
        if needs_node && node_execution_id.is_none() {
            return Err(EngineError::InterruptRejected(format!(
                "{interrupt_type:?} requires a target node execution"
            )));
        }
        let plan_scoped_only = matches!(
            interrupt_type,
            InterruptType::AbortAll
                | InterruptType::Pause
                | InterruptType::RollbackPlan
        );
        if plan_scoped_only && node_execution_id.is_some() {
            return Err(EngineError::InterruptRejected(format!(
                "{interrupt_type:?} applies to the whole plan execution"
            )));
        }
        Ok(())
    }

    async fn apply(&self, interrupt: &Interrupt) -> EngineResult<()> {
        match interrupt.interrupt_type {
            InterruptType::AbortAll | InterruptType::RollbackPlan => {
                self.discontinue_plan(&interrupt.plan_execution_id).await
            }
            InterruptType::Abort => {
                let node_execution_id = Self::target_node(interrupt)?;
                self.finalize_node(node_execution_id, Status::Aborted).await
            }
            InterruptType::Expire => {
                let node_execution_id = Self::target_node(interrupt)?;
                self.finalize_node(node_execution_id, Status::Expired).await
            }
            InterruptType::Pause => self.pause_plan(&interrupt.plan_execution_id).await,
            InterruptType::Resume => match &interrupt.node_execution_id {
                Some(node_execution_id) => self.resume_node(node_execution_id).await,
                None => self.resume_plan(&interrupt.plan_execution_id).await,
            },
            InterruptType::Retry => {
                let node_execution_id = Self::target_node(interrupt)?;
                self.dispatch
                    .send(EngineCmd::RetryNode {
                        node_execution_id: node_execution_id.to_string(),
                    })
                    .await
            }
        }
    }

    fn target_node(interrupt: &Interrupt) -> EngineResult<&str> {
        interrupt
            .node_execution_id
            .as_deref()
            .ok_or_else(|| EngineError::InterruptRejected("missing target node".to_string()))
    }

    /// Two-phase plan drain: every in-flight node goes `Discontinuing`,
    /// then each is individually finalized `Aborted` conditioned on still
    /// being `Discontinuing`. A node whose natural completion sneaks in
    /// between the phases keeps its real result.
    async fn discontinue_plan(&self, plan_execution_id: &str) -> EngineResult<()> {
        let marked = self
            .node_store
            .mark_discontinuing(plan_execution_id, Status::abortable_statuses())
            .await?;
        tracing::info!(plan_execution_id = %plan_execution_id, count = marked.len(),
            "marked in-flight node executions discontinuing");
        for node_execution in &marked {
            let aborted = self
                .node_store
                .update_status(
                    &node_execution.uuid,
                    Status::Aborted,
                    &[Status::Discontinuing],
                    None,
                )
                .await?;
            if aborted.is_none() {
                tracing::info!(node_execution_id = %node_execution.uuid,
                    "node finalized naturally before abort landed");
            }
        }
        self.dispatch
            .send(EngineCmd::ConcludePlan {
                plan_execution_id: plan_execution_id.to_string(),
            })
            .await
    }

    /// Finalize a single node with a terminal status and hand chain
    /// continuation to the engine.
    async fn finalize_node(&self, node_execution_id: &str, status: Status) -> EngineResult<()> {
        let updated = self
            .node_store
            .update_status(
                node_execution_id,
                status,
                Status::allowed_source_set(status),
                None,
            )
            .await?;
        if updated.is_none() {
            tracing::info!(node_execution_id = %node_execution_id, %status,
                "node already finalized; interrupt is a no-op");
            return Ok(());
        }
        self.dispatch
            .send(EngineCmd::EndTransition {
                node_execution_id: node_execution_id.to_string(),
            })
            .await
    }

    /// Pausing only vetoes new node starts; nodes already running conclude
    /// naturally and their successors queue up behind the pause.
    async fn pause_plan(&self, plan_execution_id: &str) -> EngineResult<()> {
        let paused = self
            .plan_store
            .update_status(plan_execution_id, Status::Paused, &[Status::Running])
            .await?;
        if paused.is_none() {
            tracing::info!(plan_execution_id = %plan_execution_id,
                "plan execution is not running; pause is a no-op");
        }
        Ok(())
    }

    /// Lift a pause and re-drive every node the veto held back.
    async fn resume_plan(&self, plan_execution_id: &str) -> EngineResult<()> {
        let resumed = self
            .plan_store
            .update_status(plan_execution_id, Status::Running, &[Status::Paused])
            .await?;
        if resumed.is_none() {
            tracing::info!(plan_execution_id = %plan_execution_id,
                "plan execution is not paused; resume is a no-op");
            return Ok(());
        }
        let queued = self
            .node_store
            .fetch_with_status_in(plan_execution_id, &[Status::Queued])
            .await?;
        for node_execution in queued {
            self.dispatch
                .send(EngineCmd::StartNode {
                    ambiance: node_execution.ambiance.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Wake a node parked in `InterventionWaiting` (or another waiting
    /// status) with an empty response set.
    async fn resume_node(&self, node_execution_id: &str) -> EngineResult<()> {
        self.dispatch
            .send(EngineCmd::Resume {
                node_execution_id: node_execution_id.to_string(),
                responses: std::collections::HashMap::new(),
                async_error: false,
            })
            .await
    }
}
