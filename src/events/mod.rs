//! Orchestration event stream.
//!
//! External subscribers (commit-status reporters, resource cleanup, search
//! indexers) consume these events; delivery is at-least-once and duplicate
//! suppression is the subscriber's concern.

use crate::ambiance::Ambiance;
use crate::execution::Status;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    NodeStatusUpdate,
    OrchestrationEnd,
}

/// A state-transition event published by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationEvent {
    pub event_type: OrchestrationEventType,
    pub ambiance: Ambiance,
    pub status: Status,
    #[serde(default)]
    pub resolved_step_parameters: Option<Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl OrchestrationEvent {
    pub fn new(
        event_type: OrchestrationEventType,
        ambiance: Ambiance,
        status: Status,
        resolved_step_parameters: Option<Value>,
    ) -> Self {
        Self {
            event_type,
            ambiance,
            status,
            resolved_step_parameters,
            timestamp: chrono::Utc::now(),
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<OrchestrationEvent>;

/// Sender wrapper with an atomic active flag so that event emission can be
/// cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<OrchestrationEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    /// Create an emitter and its receiver half.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                active: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// An emitter with no listener; every emit is a no-op.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: OrchestrationEvent) {
        if self.is_active() {
            // A dropped receiver just deactivates the stream.
            if self.tx.send(event).is_err() {
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (emitter, mut rx) = EventEmitter::channel();
        emitter.emit(OrchestrationEvent::new(
            OrchestrationEventType::NodeStatusUpdate,
            Ambiance::new("plan-1", BTreeMap::new()),
            Status::Running,
            None,
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, OrchestrationEventType::NodeStatusUpdate);
        assert_eq!(event.status, Status::Running);
    }

    #[tokio::test]
    async fn test_disabled_emitter_drops_events() {
        let emitter = EventEmitter::disabled();
        assert!(!emitter.is_active());
        // must not panic or block
        emitter.emit(OrchestrationEvent::new(
            OrchestrationEventType::OrchestrationEnd,
            Ambiance::new("plan-1", BTreeMap::new()),
            Status::Succeeded,
            None,
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_deactivates_stream() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);
        emitter.emit(OrchestrationEvent::new(
            OrchestrationEventType::OrchestrationEnd,
            Ambiance::new("plan-1", BTreeMap::new()),
            Status::Succeeded,
            None,
        ));
        assert!(!emitter.is_active());
    }
}
