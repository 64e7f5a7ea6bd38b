//! Internal dispatch queue.
//!
//! Engine-internal hops (trigger → start, timer fire → facilitated start,
//! callback → resume, interrupt → end transition) go through a bounded
//! command queue worked by a semaphore-limited pool instead of unbounded
//! recursive calls. A single external event can therefore cause multiple
//! nested engine calls without growing the stack, and every hop is
//! re-entrant by construction.

use super::OrchestrationEngine;
use crate::ambiance::Ambiance;
use crate::error::EngineError;
use crate::facilitate::FacilitatorResponse;
use crate::waitnotify::NotifyCallback;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// One unit of engine-internal work.
#[derive(Debug, Clone)]
pub(crate) enum EngineCmd {
    /// Run pre-facilitation checks and facilitate the node the ambiance
    /// points at.
    StartNode { ambiance: Ambiance },
    /// A facilitator-declared initial wait elapsed; start the step proper.
    FacilitatedStart {
        ambiance: Ambiance,
        response: FacilitatorResponse,
    },
    /// An external event correlated back to a waiting node.
    Resume {
        node_execution_id: String,
        responses: HashMap<String, Value>,
        async_error: bool,
    },
    /// End the chain of a concluded node (interrupt path).
    EndTransition { node_execution_id: String },
    /// Recompute and finalize the plan status (interrupt path).
    ConcludePlan { plan_execution_id: String },
    /// Re-trigger a concluded node execution (retry interrupt).
    RetryNode { node_execution_id: String },
}

/// Cloneable sender half of the dispatch queue.
#[derive(Clone)]
pub(crate) struct DispatchSender {
    tx: mpsc::Sender<EngineCmd>,
}

impl DispatchSender {
    pub(crate) fn new(tx: mpsc::Sender<EngineCmd>) -> Self {
        Self { tx }
    }

    pub(crate) async fn send(&self, cmd: EngineCmd) -> Result<(), EngineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::DispatchClosed)
    }
}

/// Worker loop. Runs until every sender is dropped; each command is handled
/// on its own task under the worker-count semaphore.
pub(crate) async fn run_dispatch_loop(
    engine: Arc<OrchestrationEngine>,
    mut rx: mpsc::Receiver<EngineCmd>,
    worker_count: usize,
) {
    let permits = Arc::new(Semaphore::new(worker_count.max(1)));
    while let Some(cmd) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            handle_command(&engine, cmd).await;
            drop(permit);
        });
    }
}

async fn handle_command(engine: &OrchestrationEngine, cmd: EngineCmd) {
    match cmd {
        EngineCmd::StartNode { ambiance } => {
            if let Err(error) = engine.start_node_execution(&ambiance).await {
                engine.handle_error(&ambiance, error).await;
            }
        }
        EngineCmd::FacilitatedStart { ambiance, response } => {
            if let Err(error) = engine.invoke_step(&ambiance, response.mode).await {
                engine.handle_error(&ambiance, error).await;
            }
        }
        EngineCmd::Resume {
            node_execution_id,
            responses,
            async_error,
        } => {
            engine
                .resume_node_execution(&node_execution_id, responses, async_error)
                .await;
        }
        EngineCmd::EndTransition { node_execution_id } => {
            match engine.node_store().get(&node_execution_id).await {
                Ok(node_execution) => {
                    if let Err(error) = engine.end_transition(&node_execution).await {
                        engine.handle_error(&node_execution.ambiance, error).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(node_execution_id = %node_execution_id, %error,
                        "dropping end-transition for unknown node execution");
                }
            }
        }
        EngineCmd::ConcludePlan { plan_execution_id } => {
            engine.conclude_plan_execution(&plan_execution_id).await;
        }
        EngineCmd::RetryNode { node_execution_id } => {
            match engine.retry_node_execution(&node_execution_id, None).await {
                Ok(()) => {}
                Err(error) => {
                    tracing::warn!(node_execution_id = %node_execution_id, %error,
                        "retry dispatch failed");
                }
            }
        }
    }
}

/// Waiter that re-enters the engine when a correlated external event (task
/// callback, child-chain end) arrives for a waiting node.
pub(crate) struct EngineResumeCallback {
    pub(crate) dispatch: DispatchSender,
    pub(crate) node_execution_id: String,
}

/// A payload with a truthy `async_error` field marks the delivery as an
/// asynchronous failure rather than a step response.
fn is_async_error(responses: &HashMap<String, Value>) -> bool {
    responses
        .values()
        .any(|v| v.get("async_error").and_then(Value::as_bool) == Some(true))
}

#[async_trait]
impl NotifyCallback for EngineResumeCallback {
    async fn notify(&self, responses: HashMap<String, Value>) {
        let async_error = is_async_error(&responses);
        let cmd = EngineCmd::Resume {
            node_execution_id: self.node_execution_id.clone(),
            responses,
            async_error,
        };
        if self.dispatch.send(cmd).await.is_err() {
            tracing::warn!(node_execution_id = %self.node_execution_id,
                "dropping resume: engine dispatch queue closed");
        }
    }
}

/// Waiter parked behind a facilitator-declared initial delay; fires the
/// actual step start when the timer delivers.
pub(crate) struct EngineWaitResumeCallback {
    pub(crate) dispatch: DispatchSender,
    pub(crate) ambiance: Ambiance,
    pub(crate) response: FacilitatorResponse,
}

#[async_trait]
impl NotifyCallback for EngineWaitResumeCallback {
    async fn notify(&self, _responses: HashMap<String, Value>) {
        let cmd = EngineCmd::FacilitatedStart {
            ambiance: self.ambiance.clone(),
            response: self.response.clone(),
        };
        if self.dispatch.send(cmd).await.is_err() {
            tracing::warn!("dropping facilitated start: engine dispatch queue closed");
        }
    }
}

/// Waiter parked behind a retry delay; re-triggers the retried node's start
/// when the timer delivers.
pub(crate) struct EngineTriggerCallback {
    pub(crate) dispatch: DispatchSender,
    pub(crate) ambiance: Ambiance,
}

#[async_trait]
impl NotifyCallback for EngineTriggerCallback {
    async fn notify(&self, _responses: HashMap<String, Value>) {
        let cmd = EngineCmd::StartNode {
            ambiance: self.ambiance.clone(),
        };
        if self.dispatch.send(cmd).await.is_err() {
            tracing::warn!("dropping retry trigger: engine dispatch queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_async_error_detection() {
        let mut responses = HashMap::new();
        responses.insert("c1".to_string(), json!({"ok": true}));
        assert!(!is_async_error(&responses));

        responses.insert(
            "c2".to_string(),
            json!({"async_error": true, "message": "delegate lost"}),
        );
        assert!(is_async_error(&responses));
    }
}
