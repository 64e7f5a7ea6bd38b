//! Immutable plan graph.
//!
//! A [`Plan`] is the precompiled description of a pipeline: its nodes, their
//! step types and parameters, and the adviser/facilitator obtainments attached
//! to each node. Plans are produced upstream and are read-only to the engine;
//! nodes are shared via `Arc` and never mutated after compile time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Request to attach an adviser to a node: which adviser type, and the
/// adviser-specific configuration it is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviserObtainment {
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters,
        }
    }
}

/// One node of a plan. Immutable and shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique setup-time id of the node within its plan.
    pub uuid: String,
    /// Human-readable name, used in logs and errors.
    pub name: String,
    /// Stable identifier within the plan (used by advisers to reference
    /// sibling nodes).
    pub identifier: String,
    /// Step type tag; resolved against the step and facilitator registries.
    pub step_type: String,
    /// Serialized step parameters, resolved against the ambiance before the
    /// step starts.
    #[serde(default)]
    pub step_parameters: Value,
    /// Advisers evaluated after the node concludes, in declaration order.
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    /// Skip the unresolved-expression check during parameter resolution.
    #[serde(default)]
    pub skip_unresolved_expressions_check: bool,
    /// Group/category used for status aggregation and event payloads.
    #[serde(default)]
    pub group: Option<String>,
    /// Optional wait before the node may start, surfaced through the
    /// facilitator for this node's step type.
    #[serde(default, with = "crate::plan::opt_duration_secs")]
    pub initial_wait: Option<Duration>,
}

impl PlanNode {
    pub fn has_advisers(&self) -> bool {
        !self.adviser_obtainments.is_empty()
    }
}

/// Builder for [`PlanNode`]. Plans are compiled upstream; the builder exists
/// for collaborators and tests that assemble plans programmatically.
#[derive(Debug, Default)]
pub struct PlanNodeBuilder {
    uuid: Option<String>,
    name: Option<String>,
    identifier: Option<String>,
    step_type: Option<String>,
    step_parameters: Value,
    adviser_obtainments: Vec<AdviserObtainment>,
    skip_unresolved_expressions_check: bool,
    group: Option<String>,
    initial_wait: Option<Duration>,
}

impl PlanNodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    pub fn step_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn adviser_obtainment(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    pub fn skip_unresolved_expressions_check(mut self, skip: bool) -> Self {
        self.skip_unresolved_expressions_check = skip;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn initial_wait(mut self, wait: Duration) -> Self {
        self.initial_wait = Some(wait);
        self
    }

    pub fn build(self) -> PlanNode {
        let uuid = self
            .uuid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let identifier = self.identifier.unwrap_or_else(|| uuid.clone());
        PlanNode {
            name: self.name.unwrap_or_else(|| identifier.clone()),
            uuid,
            identifier,
            step_type: self.step_type.unwrap_or_default(),
            step_parameters: self.step_parameters,
            adviser_obtainments: self.adviser_obtainments,
            skip_unresolved_expressions_check: self.skip_unresolved_expressions_check,
            group: self.group,
            initial_wait: self.initial_wait,
        }
    }
}

/// Immutable, precompiled plan graph.
#[derive(Debug, Clone)]
pub struct Plan {
    pub uuid: String,
    nodes: HashMap<String, Arc<PlanNode>>,
    starting_node_id: Option<String>,
}

impl Plan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    /// The node at which execution begins, if the plan is non-empty.
    pub fn fetch_starting_node(&self) -> Option<Arc<PlanNode>> {
        self.starting_node_id
            .as_ref()
            .and_then(|id| self.nodes.get(id))
            .cloned()
    }

    pub fn fetch_node(&self, node_id: &str) -> Option<Arc<PlanNode>> {
        self.nodes.get(node_id).cloned()
    }

    /// Look up a node by its plan-scoped identifier (as opposed to uuid).
    pub fn fetch_node_by_identifier(&self, identifier: &str) -> Option<Arc<PlanNode>> {
        self.nodes
            .values()
            .find(|n| n.identifier == identifier)
            .cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PlanBuilder {
    uuid: Option<String>,
    nodes: HashMap<String, Arc<PlanNode>>,
    starting_node_id: Option<String>,
}

impl PlanBuilder {
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn node(mut self, node: PlanNode) -> Self {
        self.nodes.insert(node.uuid.clone(), Arc::new(node));
        self
    }

    pub fn starting_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.starting_node_id = Some(node_id.into());
        self
    }

    pub fn build(self) -> Plan {
        Plan {
            uuid: self
                .uuid
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            nodes: self.nodes,
            starting_node_id: self.starting_node_id,
        }
    }
}

/// Serde helper for `Option<Duration>` as whole seconds.
pub(crate) mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
