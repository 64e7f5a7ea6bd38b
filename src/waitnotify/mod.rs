//! Wait/notify correlation service.
//!
//! The single mechanism by which any asynchronous external event (task
//! callback, timer fire, sub-plan completion) re-enters the engine: a waiter
//! registers a callback under a set of correlation ids, and `done_with`
//! delivers a payload for one id. The callback fires once every id of the
//! set has reported. A `done_with` with no matching waiter is dropped with a
//! warning, which tolerates at-least-once delivery from the task layer.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Invoked once all correlation ids of a wait have reported. `responses`
/// maps each correlation id to the payload delivered for it.
#[async_trait]
pub trait NotifyCallback: Send + Sync {
    async fn notify(&self, responses: HashMap<String, Value>);
}

struct WaitInstance {
    callback: Arc<dyn NotifyCallback>,
    pending: HashSet<String>,
    collected: HashMap<String, Value>,
}

/// Correlation table. Cheap to clone; all clones share the table.
#[derive(Clone, Default)]
pub struct WaitNotifyEngine {
    waiters: Arc<DashMap<String, Arc<Mutex<WaitInstance>>>>,
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to fire once every id in `correlation_ids` has
    /// been delivered. Each id must be globally unique among outstanding
    /// waits; a colliding id is rejected (logged, returns `false`).
    pub fn wait_for_all_on(
        &self,
        callback: Arc<dyn NotifyCallback>,
        correlation_ids: &[String],
    ) -> bool {
        if correlation_ids.is_empty() {
            return false;
        }
        for id in correlation_ids {
            if self.waiters.contains_key(id) {
                tracing::warn!(correlation_id = %id, "wait registration rejected: id already in use");
                return false;
            }
        }
        let instance = Arc::new(Mutex::new(WaitInstance {
            callback,
            pending: correlation_ids.iter().cloned().collect(),
            collected: HashMap::new(),
        }));
        for id in correlation_ids {
            self.waiters.insert(id.clone(), instance.clone());
        }
        true
    }

    /// Deliver a payload for one correlation id. Fires the waiter's callback
    /// if this was the last outstanding id of its set. Unknown ids are
    /// dropped.
    pub async fn done_with(&self, correlation_id: &str, payload: Value) {
        let Some((_, instance)) = self.waiters.remove(correlation_id) else {
            tracing::warn!(correlation_id = %correlation_id, "dropping notify with no matching waiter");
            return;
        };
        let ready = {
            let mut inner = instance.lock();
            inner.pending.remove(correlation_id);
            inner
                .collected
                .insert(correlation_id.to_string(), payload);
            if inner.pending.is_empty() {
                Some((inner.callback.clone(), std::mem::take(&mut inner.collected)))
            } else {
                None
            }
        };
        if let Some((callback, responses)) = ready {
            callback.notify(responses).await;
        }
    }

    /// Schedule a timer that delivers an empty payload for `correlation_id`
    /// after `duration`. The waiter for the id must already be registered;
    /// a fire against an unregistered id is dropped like any other unmatched
    /// notify.
    pub fn delay(&self, correlation_id: impl Into<String>, duration: Duration) {
        let engine = self.clone();
        let fire_id = correlation_id.into();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            engine.done_with(&fire_id, Value::Object(Default::default())).await;
        });
    }

    pub fn outstanding_waits(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    struct Recorder {
        fired: Arc<AsyncMutex<Vec<HashMap<String, Value>>>>,
    }

    #[async_trait]
    impl NotifyCallback for Recorder {
        async fn notify(&self, responses: HashMap<String, Value>) {
            self.fired.lock().await.push(responses);
        }
    }

    fn recorder() -> (Arc<Recorder>, Arc<AsyncMutex<Vec<HashMap<String, Value>>>>) {
        let fired = Arc::new(AsyncMutex::new(Vec::new()));
        (
            Arc::new(Recorder {
                fired: fired.clone(),
            }),
            fired,
        )
    }

    #[tokio::test]
    async fn test_single_id_wait_fires_once() {
        let engine = WaitNotifyEngine::new();
        let (callback, fired) = recorder();
        assert!(engine.wait_for_all_on(callback, &["c1".to_string()]));

        engine.done_with("c1", serde_json::json!({"ok": true})).await;
        // Re-delivery is dropped, not re-fired.
        engine.done_with("c1", serde_json::json!({"ok": true})).await;

        let fired = fired.lock().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0]["c1"]["ok"], true);
        assert_eq!(engine.outstanding_waits(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_all_collects_every_id() {
        let engine = WaitNotifyEngine::new();
        let (callback, fired) = recorder();
        engine.wait_for_all_on(callback, &["a".to_string(), "b".to_string()]);

        engine.done_with("a", serde_json::json!(1)).await;
        assert!(fired.lock().await.is_empty());

        engine.done_with("b", serde_json::json!(2)).await;
        let fired = fired.lock().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let engine = WaitNotifyEngine::new();
        engine.done_with("nobody-home", Value::Null).await;
        assert_eq!(engine.outstanding_waits(), 0);
    }

    #[tokio::test]
    async fn test_colliding_registration_is_rejected() {
        let engine = WaitNotifyEngine::new();
        let (first, _) = recorder();
        let (second, _) = recorder();
        assert!(engine.wait_for_all_on(first, &["c1".to_string()]));
        assert!(!engine.wait_for_all_on(second, &["c1".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fires_after_duration() {
        let engine = WaitNotifyEngine::new();
        let (callback, fired) = recorder();
        let id = uuid::Uuid::new_v4().to_string();
        engine.wait_for_all_on(callback, &[id.clone()]);
        engine.delay(id, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delay_with_zero_duration_reaches_prior_waiter() {
        let engine = WaitNotifyEngine::new();
        let (callback, fired) = recorder();
        let id = uuid::Uuid::new_v4().to_string();
        engine.wait_for_all_on(callback, &[id.clone()]);
        engine.delay(id, Duration::ZERO);

        for _ in 0..20 {
            if !fired.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.lock().await.len(), 1);
        assert_eq!(engine.outstanding_waits(), 0);
    }
}
