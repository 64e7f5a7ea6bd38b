//! Persistence contracts and the in-memory reference implementation.
//!
//! The stores are the engine's only synchronization point: there is
//! deliberately no in-process lock spanning two node executions, so every
//! state change is expressed as a conditional update ("set status to X only
//! if the current status is in X's allowed-source set"). Racing writers are
//! serialized by whichever conditional write lands first; the loser observes
//! a `None` result and stops.

pub mod memory;

use crate::error::StoreResult;
use crate::execution::{NodeExecution, PlanExecution, Status};
use crate::interrupt::{Interrupt, InterruptState};
use async_trait::async_trait;

/// Field mutation applied inside a store update, under the store's own
/// synchronization. Must not touch `status`, `end_ts`, or `version`; those
/// belong to the store.
pub type NodeUpdateOps = Box<dyn FnOnce(&mut NodeExecution) + Send>;

/// Store of [`NodeExecution`] records, keyed by uuid with secondary lookups
/// on `plan_execution_id` and `status`.
#[async_trait]
pub trait NodeExecutionStore: Send + Sync {
    /// Insert a new record. Fails on duplicate uuid.
    async fn save(&self, execution: NodeExecution) -> StoreResult<NodeExecution>;

    async fn get(&self, node_execution_id: &str) -> StoreResult<NodeExecution>;

    /// Apply a field update unconditionally and bump the record version.
    async fn update(
        &self,
        node_execution_id: &str,
        ops: NodeUpdateOps,
    ) -> StoreResult<NodeExecution>;

    /// The conditional-update primitive. Sets `status` only if the current
    /// status is in `allowed_sources`, applying `ops` in the same atomic
    /// step. `end_ts` is stamped for terminal targets and cleared for
    /// non-terminal ones, so reopening a concluded record leaves it live
    /// again. Returns `Ok(None)` when the condition fails; the caller lost
    /// a race and must treat it as a no-op, not an error.
    async fn update_status(
        &self,
        node_execution_id: &str,
        status: Status,
        allowed_sources: &[Status],
        ops: Option<NodeUpdateOps>,
    ) -> StoreResult<Option<NodeExecution>>;

    /// All executions of a plan run, minus superseded retry attempts unless
    /// requested.
    async fn fetch_by_plan_execution(
        &self,
        plan_execution_id: &str,
        include_old_retries: bool,
    ) -> StoreResult<Vec<NodeExecution>>;

    /// Executions of a plan run currently in one of `statuses`, excluding
    /// superseded retry attempts.
    async fn fetch_with_status_in(
        &self,
        plan_execution_id: &str,
        statuses: &[Status],
    ) -> StoreResult<Vec<NodeExecution>>;

    /// Flag a failed attempt as superseded by a retry.
    async fn mark_retried(&self, node_execution_id: &str) -> StoreResult<NodeExecution>;

    /// Move every in-flight execution of a plan run into `Discontinuing`.
    /// Returns the affected records.
    async fn mark_discontinuing(
        &self,
        plan_execution_id: &str,
        from_statuses: &[Status],
    ) -> StoreResult<Vec<NodeExecution>>;

    /// Last-resort sweep: mark every active execution of a plan run
    /// `Errored` with an end timestamp. Returns the number changed.
    async fn error_out_active(&self, plan_execution_id: &str) -> StoreResult<u64>;
}

/// Store of [`PlanExecution`] records.
#[async_trait]
pub trait PlanExecutionStore: Send + Sync {
    async fn save(&self, execution: PlanExecution) -> StoreResult<PlanExecution>;

    async fn get(&self, plan_execution_id: &str) -> StoreResult<PlanExecution>;

    /// Conditional status update, mirroring the node-store primitive. Sets
    /// `end_ts` for terminal targets. `Ok(None)` on a condition miss.
    async fn update_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed_sources: &[Status],
    ) -> StoreResult<Option<PlanExecution>>;
}

/// Append-only log of [`Interrupt`] records. Interrupts are never deleted,
/// only advanced through their state machine.
#[async_trait]
pub trait InterruptStore: Send + Sync {
    async fn save(&self, interrupt: Interrupt) -> StoreResult<Interrupt>;

    async fn get(&self, interrupt_id: &str) -> StoreResult<Interrupt>;

    async fn update_state(
        &self,
        interrupt_id: &str,
        state: InterruptState,
    ) -> StoreResult<Interrupt>;

    /// All interrupts registered against a plan run, oldest first.
    async fn fetch_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> StoreResult<Vec<Interrupt>>;
}
