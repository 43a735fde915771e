//! Scenario: Daemon Routes End-to-End
//!
//! # Invariants under test
//! The bare router (no middleware), wired over in-process backends, serves:
//! - `GET /v1/health` → 200 with service identity.
//! - `POST /v1/ingest` with an unknown flow → 404, nothing published.
//! - `POST /v1/ingest` with `wait_ms` → the inlined result envelope, i.e.
//!   a full trip through ingress → task stream → worker → agent → results
//!   stream, over HTTP.
//! - `GET /v1/status` → registered flows, domain stream stats, config hash.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use weft_daemon::{routes, wiring};
use weft_stream::MemoryStreams;

async fn router() -> axum::Router {
    let mut cfg = weft_config::Config::default();
    cfg.stream.retry_backoff_ms = 0;
    cfg.ops.hb_enabled = false;
    let store = Arc::new(MemoryStreams::new());
    let fabric = wiring::bootstrap(&cfg, store, None).await.unwrap();
    routes::build_router(Arc::clone(&fabric.state))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_service_identity() {
    let app = router().await;
    let response = app
        .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let v = body_json(response).await;
    assert_eq!(v["ok"], json!(true));
    assert_eq!(v["service"], json!("weft-daemon"));
}

#[tokio::test]
async fn unknown_flow_is_404() {
    let app = router().await;
    let response = app
        .oneshot(post_json("/v1/ingest", json!({"flow": "nope", "payload": {}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let v = body_json(response).await;
    assert!(v["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn write_then_retrieve_round_trips_over_http() {
    let app = router().await;

    // Write a lead through the persist flow.
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/ingest",
            json!({
                "flow": "persist.write",
                "payload": {"op": "write", "table": "leads",
                            "record": {"email": "a@x.io", "company": "Acme"}},
                "wait_ms": 5000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["result"]["status"], json!("SUCCESS"));
    assert_eq!(
        v["result"]["envelope"]["records"][0]["email"],
        json!("a@x.io")
    );

    // Retrieve it back through the rag flow.
    let response = app
        .oneshot(post_json(
            "/v1/ingest",
            json!({
                "flow": "rag.retrieve",
                "payload": {"prompt": "find leads at acme"},
                "wait_ms": 5000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["result"]["status"], json!("SUCCESS"));
    let envelope = &v["result"]["envelope"];
    assert_eq!(envelope["metadata"]["total_count"], json!(1));
    assert_eq!(envelope["records"][0]["email"], json!("a@x.io"));
    assert!(envelope["records"][0]["provenance"]["row_hash"]
        .as_str()
        .unwrap()
        .len()
        > 32);
}

#[tokio::test]
async fn status_lists_flows_and_domains() {
    let app = router().await;
    // One processed task so pending stats exist.
    app.clone()
        .oneshot(post_json(
            "/v1/ingest",
            json!({"flow": "rag.retrieve", "payload": {"prompt": "x"}, "wait_ms": 5000}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let v = body_json(response).await;
    let flows: Vec<&str> = v["flows"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(flows, vec!["persist.write", "rag.retrieve"]);
    assert!(!v["config_hash"].as_str().unwrap().is_empty());

    let domains: Vec<&str> = v["domains"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["domain"].as_str())
        .collect();
    assert!(domains.contains(&"rag"));
    assert!(domains.contains(&"persist"));
}
