//! Nested plan scenarios: a step spawning a child chain whose terminal
//! status wakes the waiting parent.

mod common;

use common::*;
use planflow::{AdviserObtainment, Status};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_child_chain_success_resumes_parent() {
    let child = Arc::new(plan_with_nodes(
        "c1",
        vec![
            script_node("c1")
                .adviser_obtainment(AdviserObtainment::new(
                    "on-success",
                    json!({"next_node_id": "c2"}),
                ))
                .build(),
            script_node("c2").build(),
        ],
    ));
    let (engine, mut events) = test_engine(Some(child));
    let plan = plan_with_nodes(
        "parent",
        vec![script_node("parent").step_type("spawn").build()],
    );
    let run = engine
        .start_plan_execution(plan, BTreeMap::new())
        .await
        .unwrap();

    await_plan_status(&engine, &run.uuid, Status::Succeeded).await;

    let parent = fetch_node(&engine, &run.uuid, "parent").await.unwrap();
    assert_eq!(parent.status, Status::Succeeded);

    // Child executions persist in the same plan run, one level deeper.
    let c1 = fetch_node(&engine, &run.uuid, "c1").await.unwrap();
    let c2 = fetch_node(&engine, &run.uuid, "c2").await.unwrap();
    assert_eq!(c1.status, Status::Succeeded);
    assert_eq!(c2.status, Status::Succeeded);
    assert_eq!(c1.parent_id.as_deref(), Some(parent.uuid.as_str()));
    assert_eq!(c1.ambiance.depth(), 2);
    assert!(c1.notify_id.is_some());
    assert_eq!(c1.notify_id, c2.notify_id);

    let ends = collect_end_events(&mut events, Duration::from_millis(300)).await;
    assert_eq!(ends.len(), 1, "only the outermost chain ends the plan");
}

#[tokio::test]
async fn test_child_chain_failure_propagates_to_parent() {
    let child = Arc::new(plan_with_nodes(
        "c1",
        vec![script_node("c1")
            .step_parameters(json!({"fail": true}))
            .build()],
    ));
    let (engine, _events) = test_engine(Some(child));
    let plan = plan_with_nodes(
        "parent",
        vec![script_node("parent").step_type("spawn").build()],
    );
    let run = engine
        .start_plan_execution(plan, BTreeMap::new())
        .await
        .unwrap();

    await_plan_status(&engine, &run.uuid, Status::Failed).await;
    let parent = fetch_node(&engine, &run.uuid, "parent").await.unwrap();
    assert_eq!(parent.status, Status::Failed);
    assert!(parent.failure_info.is_some());
}
