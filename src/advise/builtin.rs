//! Built-in advisers.

use super::{Adviser, AdviserResponse, AdvisingEvent};
use crate::execution::Status;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// On success, proceed to the sibling named in the obtainment parameters.
/// Declines for any non-`Succeeded` conclusion.
#[derive(Debug, Default)]
pub struct OnSuccessAdviser;

#[derive(Debug, Deserialize)]
struct OnSuccessParameters {
    next_node_id: String,
}

#[async_trait]
impl Adviser for OnSuccessAdviser {
    async fn on_advise_event(&self, event: &AdvisingEvent) -> Option<AdviserResponse> {
        if event.status != Status::Succeeded {
            return None;
        }
        let params: OnSuccessParameters =
            serde_json::from_value(event.adviser_parameters.clone()).ok()?;
        Some(AdviserResponse::NextStep {
            next_node_id: params.next_node_id,
        })
    }
}

/// On failure, request a retry until the attempt budget is spent; the final
/// failure falls through to the next adviser (or ends the chain).
#[derive(Debug, Default)]
pub struct OnFailRetryAdviser;

#[derive(Debug, Deserialize)]
struct OnFailRetryParameters {
    max_retries: usize,
    #[serde(default)]
    wait_secs: Option<u64>,
}

#[async_trait]
impl Adviser for OnFailRetryAdviser {
    async fn on_advise_event(&self, event: &AdvisingEvent) -> Option<AdviserResponse> {
        if event.status != Status::Failed {
            return None;
        }
        let params: OnFailRetryParameters =
            serde_json::from_value(event.adviser_parameters.clone()).ok()?;
        if event.retry_count >= params.max_retries {
            return None;
        }
        Some(AdviserResponse::Retry {
            wait: params.wait_secs.map(Duration::from_secs),
        })
    }
}

/// Escalate a failure to manual intervention: the node parks in
/// `InterventionWaiting` until an external interrupt resolves it.
#[derive(Debug, Default)]
pub struct ManualInterventionAdviser;

#[async_trait]
impl Adviser for ManualInterventionAdviser {
    async fn on_advise_event(&self, event: &AdvisingEvent) -> Option<AdviserResponse> {
        match event.status {
            Status::Failed | Status::Errored | Status::Expired => {
                Some(AdviserResponse::InterventionWait)
            }
            _ => None,
        }
    }
}

/// Mark a failed node `Succeeded` and carry on, optionally naming the next
/// sibling.
#[derive(Debug, Default)]
pub struct IgnoreFailureAdviser;

#[derive(Debug, Default, Deserialize)]
struct IgnoreFailureParameters {
    #[serde(default)]
    next_node_id: Option<String>,
}

#[async_trait]
impl Adviser for IgnoreFailureAdviser {
    async fn on_advise_event(&self, event: &AdvisingEvent) -> Option<AdviserResponse> {
        if event.status != Status::Failed {
            return None;
        }
        let params: IgnoreFailureParameters =
            serde_json::from_value(event.adviser_parameters.clone()).unwrap_or_default();
        Some(AdviserResponse::MarkSuccess {
            next_node_id: params.next_node_id,
        })
    }
}
