//! Persisted record of one attempt of a plan node.

use super::{FailureInfo, Status, StepOutcome, UnitProgress};
use crate::advise::AdviserResponse;
use crate::ambiance::Ambiance;
use crate::plan::PlanNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// How a node executes once facilitation has decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Step completes within the engine call.
    Sync,
    /// Step registers an async callback and the node waits on it.
    Async,
    /// Step dispatches an external task and the node waits on its completion.
    Task,
    /// Step spawns a nested plan chain; the node waits on the chain's end.
    Child,
}

/// One attempt of a plan node. The unit of crash recovery and of optimistic
/// concurrency control: all mutation goes through the store's conditional
/// updates, keyed by the `version` counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: String,
    pub plan_node: Arc<PlanNode>,
    pub ambiance: Ambiance,
    pub status: Status,
    #[serde(default)]
    pub resolved_step_parameters: Option<Value>,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Correlation id a parent chain is waiting on; `None` for the root of a
    /// DAG chain. Whoever ends the chain notifies this id.
    #[serde(default)]
    pub notify_id: Option<String>,
    /// Lookup references into the store, not ownership links.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub previous_id: Option<String>,
    #[serde(default)]
    pub next_id: Option<String>,
    /// Uuids of earlier failed attempts this execution retries, oldest first.
    #[serde(default)]
    pub retry_ids: Vec<String>,
    /// Set on a superseded attempt once a retry replaces it; excluded from
    /// status aggregation and recovery scans.
    #[serde(default)]
    pub old_retry: bool,
    #[serde(default)]
    pub outcomes: Vec<StepOutcome>,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub unit_progresses: Vec<UnitProgress>,
    #[serde(default, with = "crate::plan::opt_duration_secs")]
    pub initial_wait: Option<Duration>,
    #[serde(default)]
    pub adviser_response: Option<AdviserResponse>,
    pub start_ts: i64,
    #[serde(default)]
    pub end_ts: Option<i64>,
    /// Store CAS counter, bumped on every successful update.
    #[serde(default)]
    pub version: u64,
}

impl NodeExecution {
    pub fn new(uuid: impl Into<String>, plan_node: Arc<PlanNode>, ambiance: Ambiance) -> Self {
        Self {
            uuid: uuid.into(),
            plan_node,
            ambiance,
            status: Status::Queued,
            resolved_step_parameters: None,
            mode: None,
            notify_id: None,
            parent_id: None,
            previous_id: None,
            next_id: None,
            retry_ids: Vec::new(),
            old_retry: false,
            outcomes: Vec::new(),
            failure_info: None,
            unit_progresses: Vec::new(),
            initial_wait: None,
            adviser_response: None,
            start_ts: chrono::Utc::now().timestamp_millis(),
            end_ts: None,
            version: 0,
        }
    }

    pub fn plan_execution_id(&self) -> &str {
        &self.ambiance.plan_execution_id
    }

    /// Whether this execution is itself a retry of an earlier attempt.
    pub fn is_retry(&self) -> bool {
        !self.retry_ids.is_empty()
    }

    pub fn retry_count(&self) -> usize {
        self.retry_ids.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() && self.end_ts.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNodeBuilder;
    use std::collections::BTreeMap;

    #[test]
    fn test_fresh_execution_is_queued() {
        let node = Arc::new(PlanNodeBuilder::new().uuid("n1").build());
        let execution =
            NodeExecution::new("rt-1", node, Ambiance::new("plan-1", BTreeMap::new()));

        assert_eq!(execution.status, Status::Queued);
        assert!(!execution.is_retry());
        assert!(!execution.is_terminal());
        assert_eq!(execution.plan_execution_id(), "plan-1");
    }
}
