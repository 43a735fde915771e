//! Scenario: Reformulation Hit
//!
//! A filter set whose email matches nothing must be relaxed: the
//! `drop_email` strategy fires first, finds the row by company, and the
//! attempt trail records exactly that one step.

use serde_json::json;

use weft_envelope::EnvelopeStatus;
use weft_testkit::{row, FabricHarness};

#[tokio::test]
async fn drop_email_recovers_the_company_match() {
    let fabric = FabricHarness::boot(FabricHarness::test_config()).await;
    fabric
        .seed(
            "leads",
            vec![row(&[
                ("email", json!("a@x.io")),
                ("company", json!("Acme Inc")),
            ])],
        )
        .await;

    let result = fabric
        .ingest_and_wait(
            "rag.retrieve",
            json!({"filters": {"email": "b@x.io", "company": "Acme Inc"}}),
        )
        .await;

    assert_eq!(result.status, EnvelopeStatus::Success);
    let env = result.envelope.unwrap();
    assert_eq!(env.metadata.total_count, 1);
    assert_eq!(env.records[0].columns["email"], json!("a@x.io"));

    let attempts = env.metadata.reformulation_attempts.as_ref().unwrap();
    assert_eq!(attempts.len(), 1, "first non-empty strategy stops the ladder");
    assert_eq!(attempts[0].reason, "drop_email");
    assert_eq!(attempts[0].filters, json!({"company": "Acme Inc"}));
    assert_eq!(attempts[0].result_count, 1);

    fabric.stop().await;
}
