//! # Planflow — A Pipeline Orchestration Engine
//!
//! `planflow` executes immutable plans (directed graphs of steps) as
//! persisted, resumable, interruptible runs. The engine owns no business
//! logic itself; behavior is plugged in at three seams:
//!
//! - **Steps**: the units of work. A step may finish synchronously, park the
//!   node behind an external callback or task completion, or spawn a nested
//!   child plan.
//! - **Facilitators**: per-step-type policy deciding the execution mode and
//!   an optional initial wait before the step starts.
//! - **Advisers**: per-node policy consulted after a step concludes,
//!   deciding what happens next (proceed, retry, ignore the failure, park
//!   for manual intervention, end the plan).
//!
//! Every state transition is a conditional update against the node store
//! ("set status X only if the current status is in this set"), which is the
//! engine's only synchronization primitive: concurrent finalizers race
//! safely and exactly one wins.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use planflow::{
//!     OrchestrationEngine, Plan, PlanNodeBuilder, StepRegistry, FacilitatorRegistry,
//!     SyncFacilitator,
//! };
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut facilitators = FacilitatorRegistry::new();
//!     facilitators
//!         .register("my-step", Arc::new(SyncFacilitator))
//!         .unwrap();
//!     let (engine, mut events) = OrchestrationEngine::builder()
//!         .steps(my_steps())
//!         .facilitators(facilitators)
//!         .build();
//!     let plan = my_plan();
//!     let run = engine
//!         .start_plan_execution(plan, BTreeMap::new())
//!         .await
//!         .unwrap();
//!     println!("started {}", run.uuid);
//!     while let Some(event) = events.recv().await {
//!         println!("{:?} -> {}", event.event_type, event.status);
//!     }
//! }
//! # fn my_steps() -> StepRegistry { StepRegistry::new() }
//! # fn my_plan() -> Plan { todo!() }
//! ```

pub mod advise;
pub mod ambiance;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod facilitate;
pub mod interrupt;
pub mod plan;
pub mod steps;
pub mod store;
pub mod waitnotify;

pub use advise::{
    default_adviser_registry, Adviser, AdviserRegistry, AdviserResponse, AdviserResponseType,
    AdvisingEvent,
};
pub use ambiance::{Ambiance, Level};
pub use engine::{EngineConfig, OrchestrationEngine, OrchestrationEngineBuilder};
pub use error::{EngineError, EngineResult, RegistryError, StepError, StoreError};
pub use events::{EventReceiver, OrchestrationEvent, OrchestrationEventType};
pub use execution::{
    ExecutionMode, FailureInfo, NodeExecution, PlanExecution, Status, StepOutcome, StepResponse,
    UnitProgress,
};
pub use facilitate::{
    AsyncFacilitator, ChildPlanFacilitator, Facilitator, FacilitatorRegistry, FacilitatorResponse,
    SyncFacilitator, TaskFacilitator,
};
pub use interrupt::{Interrupt, InterruptService, InterruptState, InterruptType};
pub use plan::{AdviserObtainment, Plan, PlanBuilder, PlanNode, PlanNodeBuilder};
pub use steps::{ExpressionResolver, NoopResolver, Step, StepRegistry, StepStart};
pub use waitnotify::{NotifyCallback, WaitNotifyEngine};
