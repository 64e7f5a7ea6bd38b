//! Facilitation — deciding whether and how a node starts.
//!
//! Two pieces run before any step executes:
//!
//! 1. A **pre-facilitation checker chain**. Each checker inspects the node
//!    execution and surrounding plan state and either short-circuits the
//!    chain with a decision or defers to the next checker. Checkers are pure
//!    predicates; they never mutate persisted state. A veto is a normal,
//!    logged outcome, not a failure.
//! 2. A **facilitator registry** keyed by step type. Exactly one facilitator
//!    claims a step type and produces the execution mode plus an optional
//!    initial wait; ambiguity is a configuration error caught at
//!    registration.

use crate::ambiance::Ambiance;
use crate::error::RegistryError;
use crate::execution::{ExecutionMode, NodeExecution, PlanExecution, Status};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDecision {
    /// Start the node; stop the chain.
    Proceed { reason: String },
    /// Do not start the node; stop the chain. Something else re-drives it
    /// later (a resume, a retry).
    Halt { reason: String },
    /// Do not run the step; conclude the node as if it succeeded and carry
    /// the chain forward. Stops the chain.
    End { reason: String },
    /// Defer to the next checker.
    Next,
}

/// Read-only view handed to each checker.
pub struct FacilitationContext<'a> {
    pub node_execution: &'a NodeExecution,
    pub plan_execution: &'a PlanExecution,
}

#[async_trait]
pub trait PreFacilitationChecker: Send + Sync {
    async fn check(&self, ctx: &FacilitationContext<'_>) -> CheckDecision;
}

/// A node re-driven as a retry already passed the checks on its first
/// attempt; re-checking could veto a retry the adviser explicitly requested.
#[derive(Debug, Default)]
pub struct RetryingChecker;

#[async_trait]
impl PreFacilitationChecker for RetryingChecker {
    async fn check(&self, ctx: &FacilitationContext<'_>) -> CheckDecision {
        if ctx.node_execution.is_retry() {
            CheckDecision::Proceed {
                reason: "node is being retried".to_string(),
            }
        } else {
            CheckDecision::Next
        }
    }
}

/// Vetoes starts while the plan is paused or already concluded.
#[derive(Debug, Default)]
pub struct RunPreFacilitationChecker;

#[async_trait]
impl PreFacilitationChecker for RunPreFacilitationChecker {
    async fn check(&self, ctx: &FacilitationContext<'_>) -> CheckDecision {
        match ctx.plan_execution.status {
            Status::Paused => CheckDecision::Halt {
                reason: "plan execution is paused".to_string(),
            },
            status if status.is_terminal() => CheckDecision::Halt {
                reason: format!("plan execution already concluded as {status}"),
            },
            _ => CheckDecision::Next,
        }
    }
}

/// Fallback checker: honors a `skip` flag in the node's raw step parameters
/// (evaluated upstream at plan-compile time), otherwise proceeds.
#[derive(Debug, Default)]
pub struct SkipPreFacilitationChecker;

#[async_trait]
impl PreFacilitationChecker for SkipPreFacilitationChecker {
    async fn check(&self, ctx: &FacilitationContext<'_>) -> CheckDecision {
        let skip = ctx
            .node_execution
            .plan_node
            .step_parameters
            .get("skip")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if skip {
            CheckDecision::End {
                reason: "node marked skip".to_string(),
            }
        } else {
            CheckDecision::Proceed {
                reason: "all checks passed".to_string(),
            }
        }
    }
}

/// Ordered checker chain with short-circuit semantics. Falls through to
/// proceed if every checker defers.
pub struct CheckerChain {
    checkers: Vec<Arc<dyn PreFacilitationChecker>>,
}

impl CheckerChain {
    pub fn new(checkers: Vec<Arc<dyn PreFacilitationChecker>>) -> Self {
        Self { checkers }
    }

    /// The standard chain: retrying → run → skip.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(RetryingChecker),
            Arc::new(RunPreFacilitationChecker),
            Arc::new(SkipPreFacilitationChecker),
        ])
    }

    pub async fn evaluate(&self, ctx: &FacilitationContext<'_>) -> CheckDecision {
        for checker in &self.checkers {
            match checker.check(ctx).await {
                CheckDecision::Next => continue,
                decision => return decision,
            }
        }
        CheckDecision::Proceed {
            reason: "no checker objected".to_string(),
        }
    }
}

/// What the facilitator decided: how the node runs, and whether to hold it
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorResponse {
    pub mode: ExecutionMode,
    #[serde(default, with = "crate::plan::opt_duration_secs")]
    pub initial_wait: Option<Duration>,
}

impl FacilitatorResponse {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            initial_wait: None,
        }
    }

    pub fn with_initial_wait(mode: ExecutionMode, wait: Duration) -> Self {
        Self {
            mode,
            initial_wait: Some(wait),
        }
    }

    /// Whether the node must be parked before starting.
    pub fn wants_initial_wait(&self) -> bool {
        self.initial_wait.is_some_and(|d| !d.is_zero())
    }
}

/// Policy deciding the execution mode for a step type.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn facilitate(
        &self,
        ambiance: &Ambiance,
        node_execution: &NodeExecution,
    ) -> FacilitatorResponse;
}

macro_rules! mode_facilitator {
    ($name:ident, $mode:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default)]
        pub struct $name;

        #[async_trait]
        impl Facilitator for $name {
            async fn facilitate(
                &self,
                _ambiance: &Ambiance,
                node_execution: &NodeExecution,
            ) -> FacilitatorResponse {
                FacilitatorResponse {
                    mode: $mode,
                    initial_wait: node_execution.plan_node.initial_wait,
                }
            }
        }
    };
}

mode_facilitator!(
    SyncFacilitator,
    ExecutionMode::Sync,
    "Runs the step to completion within the engine call."
);
mode_facilitator!(
    AsyncFacilitator,
    ExecutionMode::Async,
    "Step registers an async callback and the node waits on it."
);
mode_facilitator!(
    TaskFacilitator,
    ExecutionMode::Task,
    "Step dispatches an external task and the node waits on its completion."
);
mode_facilitator!(
    ChildPlanFacilitator,
    ExecutionMode::Child,
    "Step spawns a nested plan chain."
);

/// Registry of facilitators keyed by step type. One facilitator per step
/// type; duplicates are configuration errors.
#[derive(Default)]
pub struct FacilitatorRegistry {
    facilitators: HashMap<String, Arc<dyn Facilitator>>,
}

impl FacilitatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        step_type: impl Into<String>,
        facilitator: Arc<dyn Facilitator>,
    ) -> Result<(), RegistryError> {
        let step_type = step_type.into();
        if self.facilitators.contains_key(&step_type) {
            return Err(RegistryError::DuplicateFacilitator(step_type));
        }
        self.facilitators.insert(step_type, facilitator);
        Ok(())
    }

    pub fn obtain(&self, step_type: &str) -> Result<Arc<dyn Facilitator>, RegistryError> {
        self.facilitators
            .get(step_type)
            .cloned()
            .ok_or_else(|| RegistryError::FacilitatorNotFound(step_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNodeBuilder;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn context_parts(
        skip: bool,
        retry: bool,
        plan_status: Status,
    ) -> (NodeExecution, PlanExecution) {
        let mut params = json!({});
        if skip {
            params = json!({"skip": true});
        }
        let node = Arc::new(
            PlanNodeBuilder::new()
                .uuid("n1")
                .step_type("shell")
                .step_parameters(params)
                .build(),
        );
        let mut execution = NodeExecution::new(
            "rt-1",
            node,
            Ambiance::new("plan-1", BTreeMap::new()),
        );
        if retry {
            execution.retry_ids.push("rt-0".to_string());
        }
        let mut plan_execution = PlanExecution::new("plan-1", BTreeMap::new());
        plan_execution.status = plan_status;
        (execution, plan_execution)
    }

    #[tokio::test]
    async fn test_chain_proceeds_by_default() {
        let (node_execution, plan_execution) = context_parts(false, false, Status::Running);
        let decision = CheckerChain::standard()
            .evaluate(&FacilitationContext {
                node_execution: &node_execution,
                plan_execution: &plan_execution,
            })
            .await;
        assert!(matches!(decision, CheckDecision::Proceed { .. }));
    }

    #[tokio::test]
    async fn test_paused_plan_vetoes_start() {
        let (node_execution, plan_execution) = context_parts(false, false, Status::Paused);
        let decision = CheckerChain::standard()
            .evaluate(&FacilitationContext {
                node_execution: &node_execution,
                plan_execution: &plan_execution,
            })
            .await;
        assert!(matches!(decision, CheckDecision::Halt { .. }));
    }

    #[tokio::test]
    async fn test_retry_short_circuits_skip_check() {
        // skip flag set, but the node is a retry: the retrying checker wins.
        let (node_execution, plan_execution) = context_parts(true, true, Status::Running);
        let decision = CheckerChain::standard()
            .evaluate(&FacilitationContext {
                node_execution: &node_execution,
                plan_execution: &plan_execution,
            })
            .await;
        assert!(matches!(decision, CheckDecision::Proceed { .. }));
    }

    #[tokio::test]
    async fn test_skip_flag_ends_node_without_running() {
        let (node_execution, plan_execution) = context_parts(true, false, Status::Running);
        let decision = CheckerChain::standard()
            .evaluate(&FacilitationContext {
                node_execution: &node_execution,
                plan_execution: &plan_execution,
            })
            .await;
        assert!(matches!(decision, CheckDecision::End { .. }));
    }

    #[tokio::test]
    async fn test_facilitator_surfaces_initial_wait() {
        let node = Arc::new(
            PlanNodeBuilder::new()
                .uuid("n1")
                .step_type("shell")
                .initial_wait(Duration::from_secs(5))
                .build(),
        );
        let execution =
            NodeExecution::new("rt-1", node, Ambiance::new("plan-1", BTreeMap::new()));
        let response = SyncFacilitator
            .facilitate(&execution.ambiance.clone(), &execution)
            .await;
        assert_eq!(response.mode, ExecutionMode::Sync);
        assert!(response.wants_initial_wait());
    }

    #[test]
    fn test_registry_duplicate_is_config_error() {
        let mut registry = FacilitatorRegistry::new();
        registry
            .register("shell", Arc::new(SyncFacilitator))
            .unwrap();
        assert!(matches!(
            registry.register("shell", Arc::new(TaskFacilitator)),
            Err(RegistryError::DuplicateFacilitator(_))
        ));
    }
}
