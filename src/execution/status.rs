//! Execution status — the single source of truth for node and plan states.
//!
//! Every status transition in the engine is a conditional update: "set status
//! to X only if the current status is in X's allowed-source set". The sets
//! here define those transitions; the store enforces them atomically.

use serde::{Deserialize, Serialize};

/// Status of a node or plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, waiting for dispatch.
    Queued,
    Running,
    /// Waiting out a facilitator-declared initial delay.
    TimedWaiting,
    /// Waiting on an asynchronous callback.
    AsyncWaiting,
    /// Waiting on a dispatched external task.
    TaskWaiting,
    /// Waiting on manual intervention after an adviser escalation.
    InterventionWaiting,
    /// Plan-level: new node starts are vetoed until resumed.
    Paused,
    /// Transitional state while an abort interrupt drains in-flight work.
    Discontinuing,
    Succeeded,
    Failed,
    /// Engine-internal fault, not a legitimate step failure.
    Errored,
    Aborted,
    Expired,
}

/// Precedence among non-errored terminal statuses when aggregating a plan's
/// status from its nodes. Treated as configuration, not inferred.
pub const TERMINAL_PRIORITY: [Status; 3] = [Status::Aborted, Status::Expired, Status::Failed];

impl Status {
    /// Statuses an asynchronous resume signal is accepted from. Anything
    /// else means the callback is stale or duplicated.
    pub fn resumable_statuses() -> &'static [Status] {
        &[
            Status::Queued,
            Status::Running,
            Status::TimedWaiting,
            Status::AsyncWaiting,
            Status::TaskWaiting,
            Status::InterventionWaiting,
            Status::Paused,
        ]
    }

    /// Statuses that still count as in-flight: not yet terminal.
    pub fn active_statuses() -> &'static [Status] {
        &[
            Status::Queued,
            Status::Running,
            Status::TimedWaiting,
            Status::AsyncWaiting,
            Status::TaskWaiting,
            Status::InterventionWaiting,
            Status::Paused,
            Status::Discontinuing,
        ]
    }

    /// Statuses a plan-scoped abort drains: everything in flight except
    /// records already picked up by another interrupt.
    pub fn abortable_statuses() -> &'static [Status] {
        &[
            Status::Queued,
            Status::Running,
            Status::TimedWaiting,
            Status::AsyncWaiting,
            Status::TaskWaiting,
            Status::InterventionWaiting,
            Status::Paused,
            Status::Discontinuing,
        ]
    }

    /// Allowed source statuses for a transition into `target`. The store
    /// conditions every status write on the current status being in this
    /// set; a miss is a no-op, which is how racing writers are serialized.
    pub fn allowed_source_set(target: Status) -> &'static [Status] {
        match target {
            Status::Queued => &[],
            Status::Running => &[
                Status::Queued,
                Status::TimedWaiting,
                Status::AsyncWaiting,
                Status::TaskWaiting,
                Status::InterventionWaiting,
                Status::Paused,
                Status::Discontinuing,
            ],
            Status::TimedWaiting => &[Status::Queued, Status::Running],
            Status::AsyncWaiting | Status::TaskWaiting => &[Status::Running],
            Status::InterventionWaiting => &[Status::Running],
            Status::Paused => &[Status::Queued, Status::Running, Status::TimedWaiting],
            Status::Discontinuing => Status::active_statuses(),
            Status::Succeeded => &[Status::Running, Status::Discontinuing],
            Status::Failed => &[
                Status::Running,
                Status::TimedWaiting,
                Status::AsyncWaiting,
                Status::TaskWaiting,
                Status::Discontinuing,
            ],
            Status::Errored => Status::active_statuses(),
            Status::Expired => &[
                Status::Running,
                Status::TimedWaiting,
                Status::AsyncWaiting,
                Status::TaskWaiting,
                Status::Discontinuing,
            ],
            Status::Aborted => Status::abortable_statuses(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded
                | Status::Failed
                | Status::Errored
                | Status::Aborted
                | Status::Expired
        )
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Status::TimedWaiting
                | Status::AsyncWaiting
                | Status::TaskWaiting
                | Status::InterventionWaiting
        )
    }

    /// Aggregate a plan status from its node statuses.
    ///
    /// Any `Errored` dominates; otherwise the highest-priority terminal
    /// status from [`TERMINAL_PRIORITY`] present among the nodes wins; all
    /// `Succeeded` means `Succeeded`; anything else is still `Running`.
    pub fn calculate_status<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let statuses: Vec<Status> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return Status::Running;
        }
        if statuses.contains(&Status::Errored) {
            return Status::Errored;
        }
        for candidate in TERMINAL_PRIORITY {
            if statuses.contains(&candidate) {
                return candidate;
            }
        }
        if statuses.iter().all(|s| *s == Status::Succeeded) {
            return Status::Succeeded;
        }
        Status::Running
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::TimedWaiting => "TIMED_WAITING",
            Status::AsyncWaiting => "ASYNC_WAITING",
            Status::TaskWaiting => "TASK_WAITING",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Paused => "PAUSED",
            Status::Discontinuing => "DISCONTINUING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Errored => "ERRORED",
            Status::Aborted => "ABORTED",
            Status::Expired => "EXPIRED",
        };
        f.write_str(text)
    }
}
