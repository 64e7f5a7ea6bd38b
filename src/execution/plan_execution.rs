//! Persisted aggregate record of a pipeline run.

use super::Status;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One pipeline run. Its status is derived by aggregating the statuses of
/// its node executions; it is only written directly at conclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecution {
    pub uuid: String,
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    pub status: Status,
    pub start_ts: i64,
    #[serde(default)]
    pub end_ts: Option<i64>,
    /// Store CAS counter, bumped on every successful update.
    #[serde(default)]
    pub version: u64,
}

impl PlanExecution {
    pub fn new(uuid: impl Into<String>, setup_abstractions: BTreeMap<String, String>) -> Self {
        Self {
            uuid: uuid.into(),
            setup_abstractions,
            status: Status::Running,
            start_ts: chrono::Utc::now().timestamp_millis(),
            end_ts: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() && self.end_ts.is_some()
    }
}
