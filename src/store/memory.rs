//! In-memory reference stores.
//!
//! Conditional updates are served under a per-collection write lock, which
//! makes the "check allowed-source set, then write" step atomic — the same
//! guarantee a document store's findAndModify or a versioned-row
//! compare-and-swap provides.

use super::{InterruptStore, NodeExecutionStore, NodeUpdateOps, PlanExecutionStore};
use crate::error::{StoreError, StoreResult};
use crate::events::{EventEmitter, OrchestrationEvent, OrchestrationEventType};
use crate::execution::{NodeExecution, PlanExecution, Status};
use crate::interrupt::{Interrupt, InterruptState};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory [`NodeExecutionStore`]. Emits a `NodeStatusUpdate` event on
/// every successful conditional status update.
pub struct InMemoryNodeExecutionStore {
    records: RwLock<HashMap<String, NodeExecution>>,
    emitter: EventEmitter,
}

impl InMemoryNodeExecutionStore {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            emitter,
        }
    }

    fn emit_status_update(&self, execution: &NodeExecution) {
        self.emitter.emit(OrchestrationEvent::new(
            OrchestrationEventType::NodeStatusUpdate,
            execution.ambiance.clone(),
            execution.status,
            execution.resolved_step_parameters.clone(),
        ));
    }
}

#[async_trait]
impl NodeExecutionStore for InMemoryNodeExecutionStore {
    async fn save(&self, execution: NodeExecution) -> StoreResult<NodeExecution> {
        let mut records = self.records.write();
        if records.contains_key(&execution.uuid) {
            return Err(StoreError::DuplicateId(execution.uuid));
        }
        records.insert(execution.uuid.clone(), execution.clone());
        Ok(execution)
    }

    async fn get(&self, node_execution_id: &str) -> StoreResult<NodeExecution> {
        self.records
            .read()
            .get(node_execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NodeExecutionNotFound(node_execution_id.to_string()))
    }

    async fn update(
        &self,
        node_execution_id: &str,
        ops: NodeUpdateOps,
    ) -> StoreResult<NodeExecution> {
        let mut records = self.records.write();
        let record = records
            .get_mut(node_execution_id)
            .ok_or_else(|| StoreError::NodeExecutionNotFound(node_execution_id.to_string()))?;
        ops(record);
        record.version += 1;
        Ok(record.clone())
    }

    async fn update_status(
        &self,
        node_execution_id: &str,
        status: Status,
        allowed_sources: &[Status],
        ops: Option<NodeUpdateOps>,
    ) -> StoreResult<Option<NodeExecution>> {
        let updated = {
            let mut records = self.records.write();
            let record = records
                .get_mut(node_execution_id)
                .ok_or_else(|| StoreError::NodeExecutionNotFound(node_execution_id.to_string()))?;
            if !allowed_sources.contains(&record.status) {
                return Ok(None);
            }
            if let Some(ops) = ops {
                ops(record);
            }
            record.status = status;
            record.end_ts = if status.is_terminal() {
                Some(now_millis())
            } else {
                None
            };
            record.version += 1;
            record.clone()
        };
        self.emit_status_update(&updated);
        Ok(Some(updated))
    }

    async fn fetch_by_plan_execution(
        &self,
        plan_execution_id: &str,
        include_old_retries: bool,
    ) -> StoreResult<Vec<NodeExecution>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.plan_execution_id() == plan_execution_id)
            .filter(|r| include_old_retries || !r.old_retry)
            .cloned()
            .collect())
    }

    async fn fetch_with_status_in(
        &self,
        plan_execution_id: &str,
        statuses: &[Status],
    ) -> StoreResult<Vec<NodeExecution>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| {
                r.plan_execution_id() == plan_execution_id
                    && !r.old_retry
                    && statuses.contains(&r.status)
            })
            .cloned()
            .collect())
    }

    async fn mark_retried(&self, node_execution_id: &str) -> StoreResult<NodeExecution> {
        self.update(node_execution_id, Box::new(|r| r.old_retry = true))
            .await
    }

    async fn mark_discontinuing(
        &self,
        plan_execution_id: &str,
        from_statuses: &[Status],
    ) -> StoreResult<Vec<NodeExecution>> {
        let mut affected = Vec::new();
        {
            let mut records = self.records.write();
            for record in records.values_mut() {
                if record.plan_execution_id() == plan_execution_id
                    && !record.old_retry
                    && from_statuses.contains(&record.status)
                {
                    record.status = Status::Discontinuing;
                    record.version += 1;
                    affected.push(record.clone());
                }
            }
        }
        for record in &affected {
            self.emit_status_update(record);
        }
        Ok(affected)
    }

    async fn error_out_active(&self, plan_execution_id: &str) -> StoreResult<u64> {
        let mut affected = Vec::new();
        {
            let mut records = self.records.write();
            for record in records.values_mut() {
                if record.plan_execution_id() == plan_execution_id
                    && Status::active_statuses().contains(&record.status)
                {
                    record.status = Status::Errored;
                    record.end_ts = Some(now_millis());
                    record.version += 1;
                    affected.push(record.clone());
                }
            }
        }
        for record in &affected {
            self.emit_status_update(record);
        }
        Ok(affected.len() as u64)
    }
}

/// In-memory [`PlanExecutionStore`].
#[derive(Default)]
pub struct InMemoryPlanExecutionStore {
    records: RwLock<HashMap<String, PlanExecution>>,
}

impl InMemoryPlanExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanExecutionStore for InMemoryPlanExecutionStore {
    async fn save(&self, execution: PlanExecution) -> StoreResult<PlanExecution> {
        let mut records = self.records.write();
        if records.contains_key(&execution.uuid) {
            return Err(StoreError::DuplicateId(execution.uuid));
        }
        records.insert(execution.uuid.clone(), execution.clone());
        Ok(execution)
    }

    async fn get(&self, plan_execution_id: &str) -> StoreResult<PlanExecution> {
        self.records
            .read()
            .get(plan_execution_id)
            .cloned()
            .ok_or_else(|| StoreError::PlanExecutionNotFound(plan_execution_id.to_string()))
    }

    async fn update_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed_sources: &[Status],
    ) -> StoreResult<Option<PlanExecution>> {
        let mut records = self.records.write();
        let record = records
            .get_mut(plan_execution_id)
            .ok_or_else(|| StoreError::PlanExecutionNotFound(plan_execution_id.to_string()))?;
        if !allowed_sources.contains(&record.status) {
            return Ok(None);
        }
        record.status = status;
        if status.is_terminal() {
            record.end_ts = Some(now_millis());
        }
        record.version += 1;
        Ok(Some(record.clone()))
    }
}

/// In-memory [`InterruptStore`].
#[derive(Default)]
pub struct InMemoryInterruptStore {
    records: RwLock<HashMap<String, Interrupt>>,
}

impl InMemoryInterruptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptStore for InMemoryInterruptStore {
    async fn save(&self, interrupt: Interrupt) -> StoreResult<Interrupt> {
        let mut records = self.records.write();
        if records.contains_key(&interrupt.uuid) {
            return Err(StoreError::DuplicateId(interrupt.uuid));
        }
        records.insert(interrupt.uuid.clone(), interrupt.clone());
        Ok(interrupt)
    }

    async fn get(&self, interrupt_id: &str) -> StoreResult<Interrupt> {
        self.records
            .read()
            .get(interrupt_id)
            .cloned()
            .ok_or_else(|| StoreError::InterruptNotFound(interrupt_id.to_string()))
    }

    async fn update_state(
        &self,
        interrupt_id: &str,
        state: InterruptState,
    ) -> StoreResult<Interrupt> {
        let mut records = self.records.write();
        let record = records
            .get_mut(interrupt_id)
            .ok_or_else(|| StoreError::InterruptNotFound(interrupt_id.to_string()))?;
        record.state = state;
        Ok(record.clone())
    }

    async fn fetch_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> StoreResult<Vec<Interrupt>> {
        let mut interrupts: Vec<Interrupt> = self
            .records
            .read()
            .values()
            .filter(|i| i.plan_execution_id == plan_execution_id)
            .cloned()
            .collect();
        interrupts.sort_by_key(|i| i.created_at);
        Ok(interrupts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::Ambiance;
    use crate::plan::PlanNodeBuilder;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn execution(uuid: &str, plan_execution_id: &str) -> NodeExecution {
        let node = Arc::new(PlanNodeBuilder::new().uuid("n1").step_type("shell").build());
        NodeExecution::new(uuid, node, Ambiance::new(plan_execution_id, BTreeMap::new()))
    }

    #[tokio::test]
    async fn test_conditional_update_no_ops_on_source_miss() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();

        // Queued -> Succeeded is not an allowed hop.
        let result = store
            .update_status(
                "rt-1",
                Status::Succeeded,
                Status::allowed_source_set(Status::Succeeded),
                None,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.get("rt-1").await.unwrap().status, Status::Queued);
    }

    #[tokio::test]
    async fn test_exactly_one_concluding_writer_wins() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store
            .update_status(
                "rt-1",
                Status::Running,
                Status::allowed_source_set(Status::Running),
                None,
            )
            .await
            .unwrap()
            .expect("queued -> running");

        let natural = store
            .update_status(
                "rt-1",
                Status::Succeeded,
                Status::allowed_source_set(Status::Succeeded),
                None,
            )
            .await
            .unwrap();
        let interrupt = store
            .update_status(
                "rt-1",
                Status::Aborted,
                Status::allowed_source_set(Status::Aborted),
                None,
            )
            .await
            .unwrap();

        assert!(natural.is_some());
        assert!(interrupt.is_none(), "loser must observe a no-op");
        let record = store.get("rt-1").await.unwrap();
        assert_eq!(record.status, Status::Succeeded);
        assert!(record.end_ts.is_some());
    }

    #[tokio::test]
    async fn test_terminal_update_sets_end_ts_and_bumps_version() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store
            .update_status("rt-1", Status::Running, &[Status::Queued], None)
            .await
            .unwrap();
        let record = store
            .update_status("rt-1", Status::Failed, &[Status::Running], None)
            .await
            .unwrap()
            .unwrap();
        assert!(record.end_ts.is_some());
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_reopening_a_concluded_record_clears_end_ts() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store
            .update_status("rt-1", Status::Running, &[Status::Queued], None)
            .await
            .unwrap();
        store
            .update_status("rt-1", Status::Failed, &[Status::Running], None)
            .await
            .unwrap();

        let reopened = store
            .update_status(
                "rt-1",
                Status::InterventionWaiting,
                &[Status::Failed],
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reopened.status, Status::InterventionWaiting);
        assert!(reopened.end_ts.is_none());
    }

    #[tokio::test]
    async fn test_status_update_emits_event() {
        let (emitter, mut rx) = EventEmitter::channel();
        let store = InMemoryNodeExecutionStore::new(emitter);
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store
            .update_status("rt-1", Status::Running, &[Status::Queued], None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, Status::Running);
    }

    #[tokio::test]
    async fn test_old_retries_excluded_from_scans() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store.save(execution("rt-2", "plan-1")).await.unwrap();
        store.mark_retried("rt-1").await.unwrap();

        let visible = store.fetch_by_plan_execution("plan-1", false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].uuid, "rt-2");

        let all = store.fetch_by_plan_execution("plan-1", true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_error_out_active_spares_terminal_records() {
        let store = InMemoryNodeExecutionStore::new(EventEmitter::disabled());
        store.save(execution("rt-1", "plan-1")).await.unwrap();
        store.save(execution("rt-2", "plan-1")).await.unwrap();
        store
            .update_status("rt-1", Status::Running, &[Status::Queued], None)
            .await
            .unwrap();
        store
            .update_status("rt-1", Status::Succeeded, &[Status::Running], None)
            .await
            .unwrap();

        let changed = store.error_out_active("plan-1").await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.get("rt-1").await.unwrap().status, Status::Succeeded);
        assert_eq!(store.get("rt-2").await.unwrap().status, Status::Errored);
    }

    #[tokio::test]
    async fn test_plan_store_concludes_once() {
        let store = InMemoryPlanExecutionStore::new();
        store
            .save(PlanExecution::new("plan-1", BTreeMap::new()))
            .await
            .unwrap();

        let first = store
            .update_status("plan-1", Status::Failed, Status::active_statuses())
            .await
            .unwrap();
        let second = store
            .update_status("plan-1", Status::Aborted, Status::active_statuses())
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(store.get("plan-1").await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_interrupt_log_is_ordered() {
        use crate::interrupt::InterruptType;
        let store = InMemoryInterruptStore::new();
        let a = Interrupt::new(InterruptType::Pause, "plan-1", None, "alice");
        let b = Interrupt::new(InterruptType::Resume, "plan-1", None, "alice");
        store.save(a.clone()).await.unwrap();
        store.save(b.clone()).await.unwrap();

        let log = store.fetch_by_plan_execution("plan-1").await.unwrap();
        assert_eq!(log.len(), 2);
        store
            .update_state(&a.uuid, InterruptState::Processed)
            .await
            .unwrap();
        assert_eq!(
            store.get(&a.uuid).await.unwrap().state,
            InterruptState::Processed
        );
    }
}
