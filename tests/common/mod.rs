//! Shared fixtures for the integration scenarios.

#![allow(dead_code)]

use async_trait::async_trait;
use planflow::{
    Ambiance, AsyncFacilitator, ChildPlanFacilitator, EventReceiver, FacilitatorRegistry,
    FailureInfo, NodeExecution, OrchestrationEngine, OrchestrationEvent, OrchestrationEventType,
    Plan, PlanExecution, PlanNode, PlanNodeBuilder, Status, Step, StepError, StepRegistry,
    StepResponse, StepStart, SyncFacilitator,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Synchronous step scripted through its parameters: `{"fail": true}` makes
/// it conclude `Failed`. Resuming it (manual intervention) succeeds.
pub struct ScriptedStep;

#[async_trait]
impl Step for ScriptedStep {
    async fn start(
        &self,
        _ambiance: &Ambiance,
        resolved_parameters: &Value,
    ) -> Result<StepStart, StepError> {
        let fail = resolved_parameters
            .get("fail")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let response = if fail {
            StepResponse::failed(FailureInfo::new("scripted failure"))
        } else {
            StepResponse::succeeded().outcome("result", Value::from("ok"))
        };
        Ok(StepStart::Sync(response))
    }

    async fn resume(
        &self,
        _ambiance: &Ambiance,
        _responses: HashMap<String, Value>,
    ) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded())
    }
}

/// Asynchronous step that parks the node on the callback id named in its
/// parameters; the test delivers the completion through the wait/notify
/// engine. A payload with `{"fail": true}` resumes into a failure.
pub struct CallbackStep;

#[async_trait]
impl Step for CallbackStep {
    async fn start(
        &self,
        _ambiance: &Ambiance,
        resolved_parameters: &Value,
    ) -> Result<StepStart, StepError> {
        let callback_id = resolved_parameters
            .get("callback_id")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::InvalidParameters("callback_id missing".to_string()))?;
        Ok(StepStart::Async {
            callback_id: callback_id.to_string(),
        })
    }

    async fn resume(
        &self,
        _ambiance: &Ambiance,
        responses: HashMap<String, Value>,
    ) -> Result<StepResponse, StepError> {
        let failed = responses
            .values()
            .any(|payload| payload.get("fail").and_then(Value::as_bool) == Some(true));
        if failed {
            Ok(StepResponse::failed(FailureInfo::new("callback failure")))
        } else {
            Ok(StepResponse::succeeded())
        }
    }
}

/// Step spawning a nested plan; its conclusion mirrors the child chain's
/// terminal status delivered in the notify payload.
pub struct SpawnChildStep {
    pub child: Arc<Plan>,
}

#[async_trait]
impl Step for SpawnChildStep {
    async fn start(
        &self,
        _ambiance: &Ambiance,
        _resolved_parameters: &Value,
    ) -> Result<StepStart, StepError> {
        Ok(StepStart::Child {
            plan: self.child.clone(),
        })
    }

    async fn resume(
        &self,
        _ambiance: &Ambiance,
        responses: HashMap<String, Value>,
    ) -> Result<StepResponse, StepError> {
        let succeeded = responses
            .values()
            .any(|payload| payload.get("status").and_then(Value::as_str) == Some("SUCCEEDED"));
        if succeeded {
            Ok(StepResponse::succeeded())
        } else {
            Ok(StepResponse::failed(FailureInfo::new("child chain failed")))
        }
    }
}

/// Install the log subscriber once per test binary; `RUST_LOG` controls
/// verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine wired with the scripted step types under `script`, `callback`,
/// and (when a child plan is supplied) `spawn`.
pub fn test_engine(child: Option<Arc<Plan>>) -> (Arc<OrchestrationEngine>, EventReceiver) {
    init_tracing();
    let mut steps = StepRegistry::new();
    steps
        .register("script", Arc::new(ScriptedStep))
        .unwrap();
    steps
        .register("callback", Arc::new(CallbackStep))
        .unwrap();
    let mut facilitators = FacilitatorRegistry::new();
    facilitators
        .register("script", Arc::new(SyncFacilitator))
        .unwrap();
    facilitators
        .register("callback", Arc::new(AsyncFacilitator))
        .unwrap();
    if let Some(child) = child {
        steps
            .register("spawn", Arc::new(SpawnChildStep { child }))
            .unwrap();
        facilitators
            .register("spawn", Arc::new(ChildPlanFacilitator))
            .unwrap();
    }
    OrchestrationEngine::builder()
        .steps(steps)
        .facilitators(facilitators)
        .build()
}

pub fn script_node(uuid: &str) -> PlanNodeBuilder {
    PlanNodeBuilder::new()
        .uuid(uuid)
        .identifier(uuid)
        .step_type("script")
}

/// Poll until the plan execution reaches `status`.
pub async fn await_plan_status(
    engine: &OrchestrationEngine,
    plan_execution_id: &str,
    status: Status,
) -> PlanExecution {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let plan_execution = engine.plan_store().get(plan_execution_id).await.unwrap();
        if plan_execution.status == status {
            return plan_execution;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "plan {plan_execution_id} stuck in {:?}, wanted {status:?}",
            plan_execution.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the node identified by its plan-node uuid reaches `status`.
pub async fn await_node_status(
    engine: &OrchestrationEngine,
    plan_execution_id: &str,
    plan_node_uuid: &str,
    status: Status,
) -> NodeExecution {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(node_execution) = fetch_node(engine, plan_execution_id, plan_node_uuid).await {
            if node_execution.status == status {
                return node_execution;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node {plan_node_uuid} never reached {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Latest (non-superseded) execution of a plan node, if any exists yet.
pub async fn fetch_node(
    engine: &OrchestrationEngine,
    plan_execution_id: &str,
    plan_node_uuid: &str,
) -> Option<NodeExecution> {
    engine
        .node_store()
        .fetch_by_plan_execution(plan_execution_id, false)
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.plan_node.uuid == plan_node_uuid)
}

/// Every persisted attempt of a plan node, superseded retries included.
pub async fn fetch_all_attempts(
    engine: &OrchestrationEngine,
    plan_execution_id: &str,
    plan_node_uuid: &str,
) -> Vec<NodeExecution> {
    engine
        .node_store()
        .fetch_by_plan_execution(plan_execution_id, true)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.plan_node.uuid == plan_node_uuid)
        .collect()
}

/// Drain the event stream for `window` and return every
/// `OrchestrationEnd` observed.
pub async fn collect_end_events(
    events: &mut EventReceiver,
    window: Duration,
) -> Vec<OrchestrationEvent> {
    let mut ends = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return ends;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(event)) => {
                if event.event_type == OrchestrationEventType::OrchestrationEnd {
                    ends.push(event);
                }
            }
            Ok(None) | Err(_) => return ends,
        }
    }
}

/// Convenience accessor used across scenarios.
pub fn plan_with_nodes(starting: &str, nodes: Vec<PlanNode>) -> Plan {
    let mut builder = Plan::builder().starting_node_id(starting);
    for node in nodes {
        builder = builder.node(node);
    }
    builder.build()
}
