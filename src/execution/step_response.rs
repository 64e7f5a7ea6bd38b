//! Messages produced by step executors when a step concludes.

use super::Status;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a step failed, surfaced on the node execution and in events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub error_message: String,
    #[serde(default)]
    pub failure_types: Vec<String>,
}

impl FailureInfo {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            failure_types: Vec::new(),
        }
    }
}

/// A named value a step publishes for downstream consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub group: Option<String>,
}

/// Progress of one unit of work inside a step (e.g. one host of a rollout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitProgress {
    pub unit_name: String,
    pub status: Status,
}

/// The message a step executor feeds back into the engine. Not persisted
/// directly; its fields are copied onto the node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default)]
    pub outcomes: Vec<StepOutcome>,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    #[serde(default)]
    pub unit_progresses: Vec<UnitProgress>,
}

impl StepResponse {
    pub fn succeeded() -> Self {
        Self::with_status(Status::Succeeded)
    }

    pub fn failed(failure_info: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            outcomes: Vec::new(),
            failure_info: Some(failure_info),
            unit_progresses: Vec::new(),
        }
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            outcomes: Vec::new(),
            failure_info: None,
            unit_progresses: Vec::new(),
        }
    }

    pub fn outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.push(StepOutcome {
            name: name.into(),
            value,
            group: None,
        });
        self
    }
}

/// Payload handed to the wait/notify engine when a child chain ends and its
/// parent is waiting on the chain's `notify_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponseNotifyData {
    pub node_uuid: String,
    pub identifier: String,
    pub group: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub outcomes: Vec<StepOutcome>,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
}
