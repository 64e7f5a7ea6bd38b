//! Execution trace.
//!
//! An [`Ambiance`] identifies where in the plan tree a unit of work is
//! running: the plan execution it belongs to, the scope it was launched under,
//! and an append-only stack of [`Level`] entries, one per nesting depth.
//! It is a value type carried on every message, which keeps the engine
//! stateless between calls.

use crate::plan::PlanNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of the trace stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Uuid of the node execution running at this depth.
    pub runtime_id: String,
    /// Uuid of the plan node backing it.
    pub setup_id: String,
    pub step_type: String,
    pub group: Option<String>,
    pub start_ts: i64,
}

impl Level {
    pub fn from_plan_node(runtime_id: impl Into<String>, node: &PlanNode) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            setup_id: node.uuid.clone(),
            step_type: node.step_type.clone(),
            group: node.group.clone(),
            start_ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Execution trace carried on every engine message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    /// Scope identifiers (account/org/project) the plan was launched under.
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Trace stack, innermost level last. Levels are appended, never removed
    /// mid-run.
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(
        plan_execution_id: impl Into<String>,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            setup_abstractions,
            levels: Vec::new(),
        }
    }

    /// Runtime id of the innermost level, i.e. the node execution this
    /// ambiance currently points at.
    pub fn obtain_current_runtime_id(&self) -> Option<&str> {
        self.levels.last().map(|l| l.runtime_id.as_str())
    }

    pub fn obtain_current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Clone with a new level appended, descending one depth.
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut cloned = self.clone();
        cloned.levels.push(level);
        cloned
    }

    /// Clone with the innermost level replaced. Used when a sibling node is
    /// triggered at the same trace position (chained execution, retries).
    pub fn clone_for_finish(&self, level: Level) -> Self {
        let mut cloned = self.clone();
        cloned.levels.pop();
        cloned.levels.push(level);
        cloned
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNodeBuilder;

    fn node(uuid: &str) -> crate::plan::PlanNode {
        PlanNodeBuilder::new().uuid(uuid).step_type("shell").build()
    }

    #[test]
    fn test_clone_for_child_appends_level() {
        let ambiance = Ambiance::new("plan-1", BTreeMap::new());
        assert!(ambiance.obtain_current_runtime_id().is_none());

        let child = ambiance.clone_for_child(Level::from_plan_node("rt-1", &node("n1")));
        assert_eq!(child.depth(), 1);
        assert_eq!(child.obtain_current_runtime_id(), Some("rt-1"));
        // the original is untouched
        assert_eq!(ambiance.depth(), 0);
    }

    #[test]
    fn test_clone_for_finish_replaces_innermost_level() {
        let ambiance = Ambiance::new("plan-1", BTreeMap::new())
            .clone_for_child(Level::from_plan_node("rt-1", &node("n1")));
        let sibling = ambiance.clone_for_finish(Level::from_plan_node("rt-2", &node("n2")));

        assert_eq!(sibling.depth(), 1);
        assert_eq!(sibling.obtain_current_runtime_id(), Some("rt-2"));
    }
}
