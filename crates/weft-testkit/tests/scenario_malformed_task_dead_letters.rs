//! Scenario: Malformed Wire Payload
//!
//! An entry whose `data` field is not a decodable task must not crash the
//! worker: it is dead-lettered with a validation reason and acked, and the
//! fabric keeps serving well-formed tasks afterwards.

use serde_json::json;

use weft_envelope::EnvelopeStatus;
use weft_testkit::{row, FabricHarness};

#[tokio::test]
async fn undecodable_entry_is_dead_lettered_and_service_continues() {
    let fabric = FabricHarness::boot(FabricHarness::test_config()).await;
    fabric
        .seed("leads", vec![row(&[("company", json!("Acme"))])])
        .await;

    fabric
        .publish_task_data("rag", "{definitely not a task".to_string())
        .await;

    // The bad entry lands on the DLQ with a validation reason.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let dlq = fabric.dlq("rag").await;
        if !dlq.is_empty() {
            assert!(dlq[0]
                .fields
                .iter()
                .any(|(k, v)| k == "reason" && v.contains("ValidationError")));
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for DLQ entry"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // A well-formed task still flows end to end.
    let result = fabric
        .ingest_and_wait("rag.retrieve", json!({"filters": {"company": "Acme"}}))
        .await;
    assert_eq!(result.status, EnvelopeStatus::Success);
    assert_eq!(result.envelope.unwrap().metadata.total_count, 1);

    fabric.stop().await;
}
