//! Interrupts — persisted, asynchronously applied control signals.
//!
//! An interrupt is registered by an external caller (abort, pause, resume,
//! retry, expire, rollback), persisted immediately, and applied against the
//! target plan or node without assuming the target is quiescent: application
//! uses the same conditional-update primitive as normal conclusion, so a
//! late-arriving natural completion and an in-flight interrupt cannot both
//! win.

pub mod service;

pub use service::InterruptService;

use serde::{Deserialize, Serialize};

/// Kind of control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    /// Abort every in-flight node of the plan and conclude it.
    AbortAll,
    /// Abort one node execution.
    Abort,
    /// Veto new node starts until resumed.
    Pause,
    /// Lift a pause and re-drive queued nodes.
    Resume,
    /// Re-trigger a concluded node execution.
    Retry,
    /// Expire one node execution (deadline elapsed upstream).
    Expire,
    /// End the current chain so an upstream-compiled rollback plan can run.
    RollbackPlan,
}

/// Interrupt lifecycle. `Registered → Processing → Processed`, or
/// `Processing → ProcessedUnsuccessfully` (non-fatal, logged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    Processed,
    ProcessedUnsuccessfully,
}

/// Persisted interrupt record. Append-only: never deleted, only advanced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub uuid: String,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: String,
    /// Target node execution, for node-scoped types.
    #[serde(default)]
    pub node_execution_id: Option<String>,
    pub issued_by: String,
    pub state: InterruptState,
    pub created_at: i64,
}

impl Interrupt {
    pub fn new(
        interrupt_type: InterruptType,
        plan_execution_id: impl Into<String>,
        node_execution_id: Option<String>,
        issued_by: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            interrupt_type,
            plan_execution_id: plan_execution_id.into(),
            node_execution_id,
            issued_by: issued_by.into(),
            state: InterruptState::Registered,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether this interrupt targets a single node rather than the plan.
    pub fn is_node_scoped(&self) -> bool {
        self.node_execution_id.is_some()
    }
}
