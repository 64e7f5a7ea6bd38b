//! Execution records and status machinery.
//!
//! - [`Status`] — the canonical status enum shared by node and plan
//!   executions, with the allowed-source sets that back every conditional
//!   status update.
//! - [`NodeExecution`] — the persisted record of one attempt of a plan node.
//! - [`PlanExecution`] — the persisted aggregate record of a pipeline run.
//! - [`StepResponse`] — the message a step executor feeds back into the
//!   engine when a step concludes.

pub mod node_execution;
pub mod plan_execution;
pub mod status;
pub mod step_response;

pub use node_execution::{ExecutionMode, NodeExecution};
pub use plan_execution::PlanExecution;
pub use status::{Status, TERMINAL_PRIORITY};
pub use step_response::{
    FailureInfo, StepOutcome, StepResponse, StepResponseNotifyData, UnitProgress,
};
