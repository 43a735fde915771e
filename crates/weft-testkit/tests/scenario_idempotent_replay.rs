//! Scenario: Idempotent Replay
//!
//! Delivering the same stream entry (same `msg_id`) twice within the lock
//! TTL must execute the agent once: the second delivery is acked without
//! effect and the results stream still holds exactly one entry for the
//! task id.
//!
//! The entry is hand-delivered through a detached runtime because a
//! healthy claim loop never re-delivers on its own; replay happens after
//! crashes, which is exactly what the idempotency lock guards.

use serde_json::json;

use weft_envelope::{Task, DATA_FIELD};
use weft_stream::StreamEntry;
use weft_testkit::{row, FabricHarness};

#[tokio::test]
async fn replayed_msg_id_has_no_second_effect() {
    let fabric = FabricHarness::boot(FabricHarness::test_config()).await;
    fabric
        .seed("leads", vec![row(&[("company", json!("Acme"))])])
        .await;

    let runtime = fabric.detached_runtime("rag");
    let task = Task::new("rag.retrieve", json!({"filters": {"company": "Acme"}}));

    // Hand-built entry: never published, so the live claim loop cannot race
    // this test for the idempotency lock.
    let entry = StreamEntry {
        id: "999-0".to_string(),
        fields: vec![(DATA_FIELD.to_string(), task.to_data())],
    };

    runtime.process_entry(entry.clone()).await;
    runtime.process_entry(entry).await;

    // One execution, one duplicate short-circuit.
    assert_eq!(fabric.events.count_of("task_claimed"), 1);
    assert_eq!(fabric.events.count_of("duplicate_delivery"), 1);

    let results = fabric.results_for("rag", task.task_id).await;
    assert_eq!(results.len(), 1, "exactly one result despite replay");
    assert_eq!(results[0].envelope.as_ref().unwrap().metadata.total_count, 1);

    fabric.stop().await;
}
