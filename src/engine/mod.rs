//! The orchestration engine — the coordinator composing every subsystem.
//!
//! The engine is an explicit struct holding `Arc` references to its
//! collaborators (stores, registries, checker chain, wait/notify service,
//! event emitter); there is no package-level mutable state. It is
//! event-driven: public operations take an ambiance or a node execution id
//! and return no synchronous result beyond the created record. Internal hops
//! are scheduled on a bounded dispatch queue (see [`dispatch`]).

pub(crate) mod dispatch;
pub(crate) mod handlers;

use crate::advise::{AdviserRegistry, AdviserResponse, AdvisingEvent};
use crate::ambiance::{Ambiance, Level};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventEmitter, EventReceiver, OrchestrationEvent, OrchestrationEventType};
use crate::execution::{
    ExecutionMode, FailureInfo, NodeExecution, PlanExecution, Status, StepResponse,
    StepResponseNotifyData,
};
use crate::facilitate::{
    CheckDecision, CheckerChain, FacilitationContext, FacilitatorRegistry, FacilitatorResponse,
};
use crate::interrupt::InterruptService;
use crate::plan::{Plan, PlanNode};
use crate::steps::{ExpressionResolver, NoopResolver, StepRegistry, StepStart};
use crate::store::memory::{
    InMemoryInterruptStore, InMemoryNodeExecutionStore, InMemoryPlanExecutionStore,
};
use crate::store::{InterruptStore, NodeExecutionStore, NodeUpdateOps, PlanExecutionStore};
use crate::waitnotify::WaitNotifyEngine;
use dashmap::DashMap;
use dispatch::{
    DispatchSender, EngineCmd, EngineResumeCallback, EngineTriggerCallback,
    EngineWaitResumeCallback,
};
use handlers::AdviseHandlerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrently worked internal commands.
    pub worker_count: usize,
    /// Capacity of the internal dispatch queue.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_capacity: 256,
        }
    }
}

/// Builder for [`OrchestrationEngine`]. Must be built inside a tokio
/// runtime; the dispatch loop is spawned at build time.
pub struct OrchestrationEngineBuilder {
    config: EngineConfig,
    steps: StepRegistry,
    facilitators: FacilitatorRegistry,
    advisers: AdviserRegistry,
    resolver: Arc<dyn ExpressionResolver>,
    node_store: Option<Arc<dyn NodeExecutionStore>>,
    plan_store: Option<Arc<dyn PlanExecutionStore>>,
    interrupt_store: Option<Arc<dyn InterruptStore>>,
}

impl Default for OrchestrationEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            steps: StepRegistry::new(),
            facilitators: FacilitatorRegistry::new(),
            advisers: crate::advise::default_adviser_registry(),
            resolver: Arc::new(NoopResolver),
            node_store: None,
            plan_store: None,
            interrupt_store: None,
        }
    }
}

impl OrchestrationEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn steps(mut self, steps: StepRegistry) -> Self {
        self.steps = steps;
        self
    }

    pub fn facilitators(mut self, facilitators: FacilitatorRegistry) -> Self {
        self.facilitators = facilitators;
        self
    }

    pub fn advisers(mut self, advisers: AdviserRegistry) -> Self {
        self.advisers = advisers;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ExpressionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn node_store(mut self, store: Arc<dyn NodeExecutionStore>) -> Self {
        self.node_store = Some(store);
        self
    }

    pub fn plan_store(mut self, store: Arc<dyn PlanExecutionStore>) -> Self {
        self.plan_store = Some(store);
        self
    }

    pub fn interrupt_store(mut self, store: Arc<dyn InterruptStore>) -> Self {
        self.interrupt_store = Some(store);
        self
    }

    /// Build the engine, spawn its dispatch loop, and hand back the event
    /// stream's receiver half.
    pub fn build(self) -> (Arc<OrchestrationEngine>, EventReceiver) {
        let (emitter, events) = EventEmitter::channel();
        let node_store = self
            .node_store
            .unwrap_or_else(|| Arc::new(InMemoryNodeExecutionStore::new(emitter.clone())));
        let plan_store = self
            .plan_store
            .unwrap_or_else(|| Arc::new(InMemoryPlanExecutionStore::new()));
        let interrupt_store = self
            .interrupt_store
            .unwrap_or_else(|| Arc::new(InMemoryInterruptStore::new()));

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let dispatch = DispatchSender::new(tx);
        let wait_notify = WaitNotifyEngine::new();
        let interrupt_service = Arc::new(InterruptService::new(
            interrupt_store,
            node_store.clone(),
            plan_store.clone(),
            dispatch.clone(),
        ));

        let engine = Arc::new(OrchestrationEngine {
            plans: DashMap::new(),
            node_store,
            plan_store,
            step_registry: self.steps,
            facilitator_registry: self.facilitators,
            adviser_registry: self.advisers,
            advise_handlers: AdviseHandlerRegistry::standard(),
            checker_chain: CheckerChain::standard(),
            resolver: self.resolver,
            wait_notify,
            emitter,
            dispatch,
            interrupt_service,
        });
        tokio::spawn(dispatch::run_dispatch_loop(
            engine.clone(),
            rx,
            self.config.worker_count,
        ));
        (engine, events)
    }
}

/// The coordinator. One instance drives any number of concurrent plan
/// executions.
pub struct OrchestrationEngine {
    /// Plans known to each plan execution (the launched plan plus any child
    /// plans spawned mid-run). Plans are immutable; this is a lookup table,
    /// not state.
    plans: DashMap<String, Vec<Arc<Plan>>>,
    node_store: Arc<dyn NodeExecutionStore>,
    plan_store: Arc<dyn PlanExecutionStore>,
    step_registry: StepRegistry,
    facilitator_registry: FacilitatorRegistry,
    adviser_registry: AdviserRegistry,
    advise_handlers: AdviseHandlerRegistry,
    checker_chain: CheckerChain,
    resolver: Arc<dyn ExpressionResolver>,
    wait_notify: WaitNotifyEngine,
    emitter: EventEmitter,
    dispatch: DispatchSender,
    interrupt_service: Arc<InterruptService>,
}

impl OrchestrationEngine {
    pub fn builder() -> OrchestrationEngineBuilder {
        OrchestrationEngineBuilder::new()
    }

    pub fn node_store(&self) -> &Arc<dyn NodeExecutionStore> {
        &self.node_store
    }

    pub fn plan_store(&self) -> &Arc<dyn PlanExecutionStore> {
        &self.plan_store
    }

    /// The interrupt registration API.
    pub fn interrupts(&self) -> &Arc<InterruptService> {
        &self.interrupt_service
    }

    /// Correlation service; the external task layer delivers completions
    /// through its `done_with`.
    pub fn wait_notify(&self) -> &WaitNotifyEngine {
        &self.wait_notify
    }

    /// Start a new pipeline run: persist the plan execution, register the
    /// plan for lookups, and trigger the starting node.
    pub async fn start_plan_execution(
        &self,
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
    ) -> EngineResult<PlanExecution> {
        let plan = Arc::new(plan);
        let starting_node = plan
            .fetch_starting_node()
            .ok_or_else(|| EngineError::EmptyPlan(plan.uuid.clone()))?;
        let plan_execution = self
            .plan_store
            .save(PlanExecution::new(
                uuid::Uuid::new_v4().to_string(),
                setup_abstractions.clone(),
            ))
            .await?;
        self.register_plan(&plan_execution.uuid, plan);
        let ambiance = Ambiance::new(&plan_execution.uuid, setup_abstractions);
        self.trigger_node(&ambiance, starting_node).await?;
        Ok(plan_execution)
    }

    fn register_plan(&self, plan_execution_id: &str, plan: Arc<Plan>) {
        self.plans
            .entry(plan_execution_id.to_string())
            .or_default()
            .push(plan);
    }

    /// Look up a plan node by uuid or identifier across every plan known to
    /// the plan execution.
    pub(crate) fn fetch_plan_node(
        &self,
        plan_execution_id: &str,
        node_ref: &str,
    ) -> Option<Arc<PlanNode>> {
        let plans = self.plans.get(plan_execution_id)?;
        plans
            .iter()
            .find_map(|p| p.fetch_node(node_ref))
            .or_else(|| {
                plans
                    .iter()
                    .find_map(|p| p.fetch_node_by_identifier(node_ref))
            })
    }

    /// Create a fresh `Queued` node execution at the ambiance's trace
    /// position and schedule its start. Entry point for both first execution
    /// and chained-sibling execution: when the ambiance already points at a
    /// predecessor, the new execution is linked after it and inherits its
    /// `notify_id`/`parent_id`.
    pub async fn trigger_node(
        &self,
        ambiance: &Ambiance,
        node: Arc<PlanNode>,
    ) -> EngineResult<NodeExecution> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let previous = match ambiance.obtain_current_runtime_id() {
            Some(current_runtime_id) => {
                let next_id = uuid.clone();
                Some(
                    self.node_store
                        .update(
                            current_runtime_id,
                            Box::new(move |record| record.next_id = Some(next_id)),
                        )
                        .await?,
                )
            }
            None => None,
        };

        let level = Level::from_plan_node(&uuid, &node);
        let cloned = if previous.is_some() {
            ambiance.clone_for_finish(level)
        } else {
            ambiance.clone_for_child(level)
        };

        let mut node_execution = NodeExecution::new(&uuid, node, cloned.clone());
        if let Some(previous) = &previous {
            node_execution.notify_id = previous.notify_id.clone();
            node_execution.parent_id = previous.parent_id.clone();
            node_execution.previous_id = Some(previous.uuid.clone());
        }
        let saved = self.node_store.save(node_execution).await?;
        self.dispatch
            .send(EngineCmd::StartNode { ambiance: cloned })
            .await?;
        Ok(saved)
    }

    /// Trigger the root of a nested plan chain. The child's chain carries a
    /// `notify_id` so that ending it wakes the waiting parent.
    pub(crate) async fn trigger_child_node(
        &self,
        parent_ambiance: &Ambiance,
        node: Arc<PlanNode>,
        notify_id: String,
    ) -> EngineResult<()> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let level = Level::from_plan_node(&uuid, &node);
        let cloned = parent_ambiance.clone_for_child(level);
        let mut node_execution = NodeExecution::new(&uuid, node, cloned.clone());
        node_execution.notify_id = Some(notify_id);
        node_execution.parent_id = parent_ambiance
            .obtain_current_runtime_id()
            .map(String::from);
        self.node_store.save(node_execution).await?;
        self.dispatch
            .send(EngineCmd::StartNode { ambiance: cloned })
            .await
    }

    /// Run pre-facilitation checks, resolve step parameters, and facilitate.
    /// A checker veto is a normal, logged outcome.
    pub async fn start_node_execution(&self, ambiance: &Ambiance) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let node_execution = self.node_store.get(runtime_id).await?;
        let plan_execution = self
            .plan_store
            .get(node_execution.plan_execution_id())
            .await?;

        let decision = self
            .checker_chain
            .evaluate(&FacilitationContext {
                node_execution: &node_execution,
                plan_execution: &plan_execution,
            })
            .await;
        match decision {
            CheckDecision::Halt { reason } => {
                tracing::info!(node_execution_id = %runtime_id, %reason, "suspending execution");
                return Ok(());
            }
            CheckDecision::End { reason } => {
                tracing::info!(node_execution_id = %runtime_id, %reason,
                    "skipping step; concluding node as succeeded");
                return self.skip_node_execution(ambiance).await;
            }
            CheckDecision::Proceed { reason } => {
                tracing::debug!(node_execution_id = %runtime_id, %reason, "proceeding with execution");
            }
            CheckDecision::Next => {}
        }

        let plan_node = node_execution.plan_node.clone();
        let resolved = self
            .resolver
            .resolve(
                ambiance,
                &plan_node.step_parameters,
                plan_node.skip_unresolved_expressions_check,
            )
            .await?;
        let node_execution = self
            .node_store
            .update(
                runtime_id,
                Box::new(move |record| record.resolved_step_parameters = Some(resolved)),
            )
            .await?;

        let facilitator = self.facilitator_registry.obtain(&plan_node.step_type)?;
        let response = facilitator.facilitate(ambiance, &node_execution).await;
        self.process_facilitator_response(ambiance, response).await
    }

    /// Conclude a skipped node as succeeded without running its step. The
    /// synthetic success goes through the standard response path so advisers
    /// still carry the chain to the next node or end it.
    async fn skip_node_execution(&self, ambiance: &Ambiance) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let claimed = self
            .node_store
            .update_status(
                runtime_id,
                Status::Running,
                Status::allowed_source_set(Status::Running),
                None,
            )
            .await?;
        if claimed.is_none() {
            tracing::info!(node_execution_id = %runtime_id,
                "not skipping: node already left a startable status");
            return Ok(());
        }
        self.process_step_response(ambiance, StepResponse::succeeded())
            .await
    }

    /// Persist the chosen execution mode; either park the node behind its
    /// initial wait or start the step right away.
    pub async fn process_facilitator_response(
        &self,
        ambiance: &Ambiance,
        response: FacilitatorResponse,
    ) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let mode = response.mode;
        let initial_wait = response.initial_wait;
        self.node_store
            .update(
                runtime_id,
                Box::new(move |record| {
                    record.mode = Some(mode);
                    record.initial_wait = initial_wait;
                }),
            )
            .await?;

        if response.wants_initial_wait() {
            let wait = response.initial_wait.unwrap_or(Duration::ZERO);
            let parked = self
                .node_store
                .update_status(
                    runtime_id,
                    Status::TimedWaiting,
                    Status::allowed_source_set(Status::TimedWaiting),
                    None,
                )
                .await?;
            if parked.is_none() {
                tracing::info!(node_execution_id = %runtime_id,
                    "skipping initial wait: node already left a startable status");
                return Ok(());
            }
            let resume_id = uuid::Uuid::new_v4().to_string();
            self.wait_notify.wait_for_all_on(
                Arc::new(EngineWaitResumeCallback {
                    dispatch: self.dispatch.clone(),
                    ambiance: ambiance.clone(),
                    response,
                }),
                std::slice::from_ref(&resume_id),
            );
            self.wait_notify.delay(resume_id, wait);
            return Ok(());
        }
        self.invoke_step(ambiance, mode).await
    }

    /// Move the node to `Running` and start its step, wiring up the wait
    /// that matches what the step produced. A failed `Running` transition
    /// means an interrupt got there first; that is a logged no-op.
    pub(crate) async fn invoke_step(
        &self,
        ambiance: &Ambiance,
        mode: ExecutionMode,
    ) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let Some(node_execution) = self
            .node_store
            .update_status(
                runtime_id,
                Status::Running,
                Status::allowed_source_set(Status::Running),
                None,
            )
            .await?
        else {
            tracing::info!(node_execution_id = %runtime_id, ?mode,
                "not starting step: node already left a startable status");
            return Ok(());
        };

        let step = self
            .step_registry
            .obtain(&node_execution.plan_node.step_type)?;
        let parameters = node_execution
            .resolved_step_parameters
            .clone()
            .unwrap_or(Value::Null);

        match step.start(ambiance, &parameters).await? {
            StepStart::Sync(step_response) => {
                self.process_step_response(ambiance, step_response).await
            }
            StepStart::Async { callback_id } => {
                self.park_waiting(runtime_id, Status::AsyncWaiting, &[callback_id])
                    .await
            }
            StepStart::Task { correlation_id } => {
                self.park_waiting(runtime_id, Status::TaskWaiting, &[correlation_id])
                    .await
            }
            StepStart::Child { plan } => {
                let callback_id = uuid::Uuid::new_v4().to_string();
                let child_root = plan
                    .fetch_starting_node()
                    .ok_or_else(|| EngineError::EmptyPlan(plan.uuid.clone()))?;
                self.register_plan(&ambiance.plan_execution_id, plan);
                self.park_waiting(runtime_id, Status::AsyncWaiting, &[callback_id.clone()])
                    .await?;
                self.trigger_child_node(ambiance, child_root, callback_id)
                    .await
            }
        }
    }

    /// Register an engine resume waiter and park the node in a waiting
    /// status.
    async fn park_waiting(
        &self,
        node_execution_id: &str,
        status: Status,
        correlation_ids: &[String],
    ) -> EngineResult<()> {
        self.wait_notify.wait_for_all_on(
            Arc::new(EngineResumeCallback {
                dispatch: self.dispatch.clone(),
                node_execution_id: node_execution_id.to_string(),
            }),
            correlation_ids,
        );
        let parked = self
            .node_store
            .update_status(
                node_execution_id,
                status,
                Status::allowed_source_set(status),
                None,
            )
            .await?;
        if parked.is_none() {
            // An interrupt concluded the node between start and park; the
            // outstanding wait goes stale and its resume is dropped later.
            tracing::info!(node_execution_id = %node_execution_id, %status,
                "node concluded before parking");
        }
        Ok(())
    }

    /// Inbound path for a completed step. With no advisers the node is
    /// concluded and its chain ended directly; otherwise the node's fields
    /// are persisted first and the adviser subsystem is invoked with the
    /// pre-conclusion status.
    pub async fn process_step_response(
        &self,
        ambiance: &Ambiance,
        step_response: StepResponse,
    ) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let node_execution = self.node_store.get(runtime_id).await?;
        let from_status = node_execution.status;
        let response_status = step_response.status;

        let fields = step_response.clone();
        let ops: NodeUpdateOps = Box::new(move |record| {
            record.outcomes = fields.outcomes;
            if fields.failure_info.is_some() {
                record.failure_info = fields.failure_info;
            }
            record.unit_progresses = fields.unit_progresses;
        });
        let Some(concluded) = self
            .conclude_node_execution(runtime_id, response_status, None, Some(ops))
            .await?
        else {
            tracing::info!(node_execution_id = %runtime_id, status = %response_status,
                "step response dropped: node already finalized");
            return Ok(());
        };

        if !concluded.plan_node.has_advisers() {
            return self.end_transition(&concluded).await;
        }

        let mut advise = None;
        for obtainment in &concluded.plan_node.adviser_obtainments {
            let adviser = self.adviser_registry.obtain(&obtainment.adviser_type)?;
            let event = AdvisingEvent {
                ambiance: ambiance.clone(),
                from_status,
                status: response_status,
                outcomes: concluded.outcomes.clone(),
                failure_info: concluded.failure_info.clone(),
                adviser_parameters: obtainment.parameters.clone(),
                retry_count: concluded.retry_count(),
            };
            if let Some(response) = adviser.on_advise_event(&event).await {
                advise = Some(response);
                break;
            }
        }
        let adviser_response = advise.unwrap_or(AdviserResponse::Unknown);
        let recorded = adviser_response.clone();
        let concluded = self
            .node_store
            .update(
                runtime_id,
                Box::new(move |record| record.adviser_response = Some(recorded)),
            )
            .await?;
        self.process_adviser_response(ambiance, &concluded, adviser_response)
            .await
    }

    /// The single choke point finalizing a node's status. Without an
    /// override set, the transition is conditioned on the status's standard
    /// allowed-source set; a condition miss returns `None` (race loser).
    pub async fn conclude_node_execution(
        &self,
        node_execution_id: &str,
        status: Status,
        override_status_set: Option<&[Status]>,
        ops: Option<NodeUpdateOps>,
    ) -> EngineResult<Option<NodeExecution>> {
        let allowed = override_status_set.unwrap_or_else(|| Status::allowed_source_set(status));
        let updated = self
            .node_store
            .update_status(node_execution_id, status, allowed, ops)
            .await?;
        if updated.is_none() {
            tracing::warn!(node_execution_id = %node_execution_id, status = %status,
                "cannot update node execution status");
        }
        Ok(updated)
    }

    /// End a concluded node's chain: wake the waiting parent if there is
    /// one, otherwise conclude the whole plan execution.
    pub async fn end_transition(&self, node_execution: &NodeExecution) -> EngineResult<()> {
        if let Some(notify_id) = &node_execution.notify_id {
            let data = StepResponseNotifyData {
                node_uuid: node_execution.plan_node.uuid.clone(),
                identifier: node_execution.plan_node.identifier.clone(),
                group: node_execution.plan_node.group.clone(),
                status: node_execution.status,
                outcomes: node_execution.outcomes.clone(),
                failure_info: node_execution.failure_info.clone(),
            };
            let payload = serde_json::to_value(&data).unwrap_or(Value::Null);
            self.wait_notify.done_with(notify_id, payload).await;
            return Ok(());
        }
        tracing::info!(plan_execution_id = %node_execution.plan_execution_id(), "ending execution");
        self.conclude_plan_execution(node_execution.plan_execution_id())
            .await;
        Ok(())
    }

    /// Recompute the plan's aggregate status and finalize it if terminal.
    /// Conclusion happens exactly once; a lost race is a logged no-op.
    pub async fn conclude_plan_execution(&self, plan_execution_id: &str) {
        let statuses = match self
            .node_store
            .fetch_by_plan_execution(plan_execution_id, false)
            .await
        {
            Ok(nodes) => nodes.iter().map(|n| n.status).collect::<Vec<_>>(),
            Err(error) => {
                tracing::warn!(plan_execution_id = %plan_execution_id, %error,
                    "cannot aggregate plan status");
                return;
            }
        };
        let calculated = Status::calculate_status(statuses);
        if !calculated.is_terminal() {
            tracing::info!(plan_execution_id = %plan_execution_id, status = %calculated,
                "plan not concludable yet");
            return;
        }
        match self
            .plan_store
            .update_status(plan_execution_id, calculated, Status::active_statuses())
            .await
        {
            Ok(Some(plan_execution)) => {
                self.emitter.emit(OrchestrationEvent::new(
                    OrchestrationEventType::OrchestrationEnd,
                    Ambiance::new(plan_execution_id, plan_execution.setup_abstractions),
                    calculated,
                    None,
                ));
            }
            Ok(None) => {
                tracing::info!(plan_execution_id = %plan_execution_id, "plan already concluded");
            }
            Err(error) => {
                tracing::warn!(plan_execution_id = %plan_execution_id, %error,
                    "failed to conclude plan execution");
            }
        }
    }

    /// Re-entry point for asynchronous completions. Stale or duplicate
    /// callbacks (node no longer resumable) are logged and dropped.
    pub async fn resume_node_execution(
        &self,
        node_execution_id: &str,
        responses: HashMap<String, Value>,
        async_error: bool,
    ) {
        let node_execution = match self.node_store.get(node_execution_id).await {
            Ok(node_execution) => node_execution,
            Err(error) => {
                tracing::warn!(node_execution_id = %node_execution_id, %error,
                    "dropping resume for unknown node execution");
                return;
            }
        };
        if !Status::resumable_statuses().contains(&node_execution.status) {
            tracing::warn!(node_execution_id = %node_execution_id,
                status = %node_execution.status,
                "node execution is no longer in a resumable status");
            return;
        }
        if node_execution.status != Status::Running {
            let running = self
                .node_store
                .update_status(
                    node_execution_id,
                    Status::Running,
                    Status::allowed_source_set(Status::Running),
                    None,
                )
                .await;
            match running {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::warn!(node_execution_id = %node_execution_id,
                        "resume lost the race to another finalizer");
                    return;
                }
                Err(error) => {
                    tracing::warn!(node_execution_id = %node_execution_id, %error,
                        "resume failed to mark node running");
                    return;
                }
            }
        }

        let ambiance = node_execution.ambiance.clone();
        let result = if async_error {
            let message = responses
                .values()
                .find_map(|v| v.get("message").and_then(Value::as_str))
                .unwrap_or("asynchronous step error")
                .to_string();
            self.process_step_response(&ambiance, StepResponse::failed(FailureInfo::new(message)))
                .await
        } else {
            match self
                .step_registry
                .obtain(&node_execution.plan_node.step_type)
            {
                Ok(step) => match step.resume(&ambiance, responses).await {
                    Ok(step_response) => {
                        self.process_step_response(&ambiance, step_response).await
                    }
                    Err(error) => Err(error.into()),
                },
                Err(error) => Err(error.into()),
            }
        };
        if let Err(error) = result {
            self.handle_error(&ambiance, error).await;
        }
    }

    /// Dispatch an adviser response to its registered handler.
    pub async fn process_adviser_response(
        &self,
        ambiance: &Ambiance,
        node_execution: &NodeExecution,
        response: AdviserResponse,
    ) -> EngineResult<()> {
        if response == AdviserResponse::Unknown {
            tracing::debug!(node_execution_id = %node_execution.uuid,
                "no adviser fired; ending chain without further advisement");
        }
        let handler = self.advise_handlers.obtain(response.response_type())?;
        handler
            .handle(self, ambiance, node_execution, response)
            .await
    }

    /// Mark a concluded attempt superseded and re-drive the same plan node
    /// with the retry chain extended, after an optional wait.
    pub async fn retry_node_execution(
        &self,
        node_execution_id: &str,
        wait: Option<Duration>,
    ) -> EngineResult<()> {
        let old = self.node_store.get(node_execution_id).await?;
        let uuid = uuid::Uuid::new_v4().to_string();
        let level = Level::from_plan_node(&uuid, &old.plan_node);
        let ambiance = old.ambiance.clone_for_finish(level);

        let mut node_execution = NodeExecution::new(&uuid, old.plan_node.clone(), ambiance.clone());
        node_execution.notify_id = old.notify_id.clone();
        node_execution.parent_id = old.parent_id.clone();
        node_execution.previous_id = old.previous_id.clone();
        node_execution.retry_ids = old.retry_ids.clone();
        node_execution.retry_ids.push(old.uuid.clone());

        self.node_store.save(node_execution).await?;
        self.node_store.mark_retried(node_execution_id).await?;

        match wait {
            Some(wait) if !wait.is_zero() => {
                let resume_id = uuid::Uuid::new_v4().to_string();
                self.wait_notify.wait_for_all_on(
                    Arc::new(EngineTriggerCallback {
                        dispatch: self.dispatch.clone(),
                        ambiance,
                    }),
                    std::slice::from_ref(&resume_id),
                );
                self.wait_notify.delay(resume_id, wait);
                Ok(())
            }
            _ => self.dispatch.send(EngineCmd::StartNode { ambiance }).await,
        }
    }

    /// Convert an engine-internal error into a synthetic failed step
    /// response and re-enter the normal conclusion machinery. If that also
    /// fails, force-error the whole plan. This path never returns an error.
    pub async fn handle_error(&self, ambiance: &Ambiance, error: EngineError) {
        tracing::warn!(plan_execution_id = %ambiance.plan_execution_id, %error,
            "engine operation failed; concluding node with synthetic failure");
        if let Err(secondary) = self.fail_node_execution(ambiance, error.to_string()).await {
            tracing::error!(plan_execution_id = %ambiance.plan_execution_id, %secondary,
                "failed to conclude node after engine error; erroring out plan execution");
            self.error_out_plan_execution(&ambiance.plan_execution_id)
                .await;
        }
    }

    /// Feed a synthetic failure for the current node through the standard
    /// response path. A fault can surface before the step ever started, so
    /// the node is first claimed `Running` from whatever active status it
    /// holds; an already-terminal node drops the failure.
    async fn fail_node_execution(&self, ambiance: &Ambiance, message: String) -> EngineResult<()> {
        let runtime_id = ambiance
            .obtain_current_runtime_id()
            .ok_or(EngineError::NoCurrentRuntimeId)?;
        let node_execution = self.node_store.get(runtime_id).await?;
        if node_execution.status.is_terminal() {
            tracing::info!(node_execution_id = %runtime_id,
                "node already concluded; dropping synthetic failure");
            return Ok(());
        }
        if node_execution.status != Status::Running {
            let claimed = self
                .node_store
                .update_status(
                    runtime_id,
                    Status::Running,
                    Status::allowed_source_set(Status::Running),
                    None,
                )
                .await?;
            if claimed.is_none() {
                tracing::info!(node_execution_id = %runtime_id,
                    "node left its active status mid-failure; dropping synthetic failure");
                return Ok(());
            }
        }
        let response = StepResponse::failed(FailureInfo::new(message));
        self.process_step_response(ambiance, response).await
    }

    /// Last resort: mark every active node `Errored` and force-conclude the
    /// plan without adviser or wait/notify machinery. Never throws.
    pub async fn error_out_plan_execution(&self, plan_execution_id: &str) {
        if let Err(error) = self.node_store.error_out_active(plan_execution_id).await {
            tracing::error!(plan_execution_id = %plan_execution_id, %error,
                "failed to error out active node executions");
        }
        match self
            .plan_store
            .update_status(plan_execution_id, Status::Errored, Status::active_statuses())
            .await
        {
            Ok(Some(plan_execution)) => {
                self.emitter.emit(OrchestrationEvent::new(
                    OrchestrationEventType::OrchestrationEnd,
                    Ambiance::new(plan_execution_id, plan_execution.setup_abstractions),
                    Status::Errored,
                    None,
                ));
            }
            Ok(None) => {
                tracing::info!(plan_execution_id = %plan_execution_id,
                    "plan already concluded; error-out is a no-op");
            }
            Err(error) => {
                tracing::error!(plan_execution_id = %plan_execution_id, %error,
                    "failed to force-error plan execution");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNodeBuilder;

    fn two_node_plan() -> Plan {
        Plan::builder()
            .node(
                PlanNodeBuilder::new()
                    .uuid("n1")
                    .identifier("prepare")
                    .step_type("shell")
                    .build(),
            )
            .node(
                PlanNodeBuilder::new()
                    .uuid("n2")
                    .identifier("deploy")
                    .step_type("shell")
                    .build(),
            )
            .starting_node_id("n1")
            .build()
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.worker_count > 0);
        assert!(config.queue_capacity > 0);
    }

    #[tokio::test]
    async fn test_plan_node_lookup_by_uuid_and_identifier() {
        let (engine, _events) = OrchestrationEngine::builder().build();
        engine.register_plan("pe-1", Arc::new(two_node_plan()));

        assert_eq!(engine.fetch_plan_node("pe-1", "n2").unwrap().uuid, "n2");
        assert_eq!(engine.fetch_plan_node("pe-1", "deploy").unwrap().uuid, "n2");
        assert!(engine.fetch_plan_node("pe-1", "missing").is_none());
        assert!(engine.fetch_plan_node("pe-other", "n1").is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_empty_plan() {
        let (engine, _events) = OrchestrationEngine::builder().build();
        let empty = Plan::builder().build();
        let result = engine
            .start_plan_execution(empty, BTreeMap::new())
            .await;
        assert!(matches!(result, Err(EngineError::EmptyPlan(_))));
    }
}
