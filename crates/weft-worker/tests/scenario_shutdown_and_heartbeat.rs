//! Scenario: Graceful Shutdown and Heartbeat Presence
//!
//! # Invariants under test
//! - A live worker keeps its heartbeat key present.
//! - The shutdown token stops the claim loop within one claim-block
//!   timeout plus the grace period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use weft_envelope::{Envelope, Task, DATA_FIELD};
use weft_monitor::Monitor;
use weft_registry::{AgentFailure, RegistryBuilder, TaskAgent};
use weft_stream::{Keyspace, MemoryStreams, StreamStore};
use weft_worker::{shutdown_channel, Dispatcher, WorkerConfig, WorkerRuntime};

struct NullAgent;

#[async_trait]
impl TaskAgent for NullAgent {
    fn name(&self) -> &'static str {
        "null"
    }
    fn domain(&self) -> &'static str {
        "rag"
    }
    async fn handle(&self, task: &Task) -> Result<Envelope, AgentFailure> {
        Ok(Envelope::from_records("agents.null", vec![], task.task_id))
    }
}

#[tokio::test]
async fn heartbeat_present_while_running_and_shutdown_is_prompt() {
    let store = Arc::new(MemoryStreams::new());
    let registry = RegistryBuilder::new()
        .register("rag.null", Arc::new(NullAgent))
        .unwrap()
        .build();

    let mut cfg = WorkerConfig::for_domain(&weft_config::Config::default(), "rag");
    cfg.consumer = "w-1".to_string();
    cfg.claim_block = Duration::from_millis(100);
    cfg.hb_enabled = true;
    cfg.hb_interval = Duration::from_millis(20);
    cfg.hb_ttl = Duration::from_secs(5);
    cfg.shutdown_grace = Duration::from_millis(500);

    let (handle, rx) = shutdown_channel();
    let runtime = WorkerRuntime::new(
        Arc::clone(&store) as Arc<dyn StreamStore>,
        registry,
        Arc::new(Dispatcher::unbounded()),
        Monitor::new(),
        Keyspace::new("agentic"),
        cfg,
        rx,
    );
    let run = tokio::spawn(runtime.run());

    // Heartbeat key appears.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if store
            .key_exists("agentic:ops:hb:worker:w-1")
            .await
            .unwrap()
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "heartbeat key never appeared"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Work still flows.
    let task = Task::new("rag.null", json!({}));
    store
        .publish(
            "agentic:rag:tasks",
            vec![(DATA_FIELD.to_string(), task.to_data())],
            None,
        )
        .await
        .unwrap();

    // Shutdown returns within claim_block + grace (generous bound).
    let started = tokio::time::Instant::now();
    handle.shutdown();
    run.await.unwrap().unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "shutdown took too long"
    );
}
