//! Scenario: Duplicate Delivery Not Executed
//!
//! # Invariant under test
//! Re-delivery of a message whose idempotency lock is still held must be
//! acknowledged without invoking the agent, and the results stream must
//! still contain exactly one entry for that `task_id` (at-most-once
//! effective delivery).
//!
//! The harness drives `process_entry` directly so the *same* `msg_id` can
//! be delivered twice — a consumer group would normally only do that after
//! a crash, which is exactly the case the lock exists for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use weft_envelope::{data_field, Envelope, Task, TaskResult, DATA_FIELD};
use weft_monitor::Monitor;
use weft_registry::{AgentFailure, RegistryBuilder, TaskAgent};
use weft_stream::{Keyspace, MemoryStreams, StreamEntry, StreamStore};
use weft_worker::{shutdown_channel, Dispatcher, WorkerConfig, WorkerRuntime};

struct CountingAgent {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskAgent for CountingAgent {
    fn name(&self) -> &'static str {
        "counting"
    }
    fn domain(&self) -> &'static str {
        "rag"
    }
    async fn handle(&self, task: &Task) -> Result<Envelope, AgentFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(Envelope::from_records("agents.counting", vec![], task.task_id))
    }
}

#[tokio::test]
async fn second_delivery_of_same_msg_id_is_acked_without_execution() {
    let store = Arc::new(MemoryStreams::new());
    store
        .create_group("agentic:rag:tasks", "rag-workers", "$")
        .await
        .unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .register(
            "rag.count",
            Arc::new(CountingAgent {
                invocations: Arc::clone(&invocations),
            }),
        )
        .unwrap()
        .build();

    let mut cfg = WorkerConfig::for_domain(&weft_config::Config::default(), "rag");
    cfg.hb_enabled = false;
    cfg.idemp_ttl = Duration::from_secs(60);

    let (_handle, rx) = shutdown_channel();
    let (monitor, captured) = Monitor::capturing();
    let runtime = WorkerRuntime::new(
        Arc::clone(&store) as Arc<dyn StreamStore>,
        registry,
        Arc::new(Dispatcher::unbounded()),
        monitor,
        Keyspace::new("agentic"),
        cfg,
        rx,
    );

    let task = Task::new("rag.count", json!({}));
    let msg_id = store
        .publish(
            "agentic:rag:tasks",
            vec![(DATA_FIELD.to_string(), task.to_data())],
            None,
        )
        .await
        .unwrap();
    let entry = StreamEntry {
        id: msg_id,
        fields: vec![(DATA_FIELD.to_string(), task.to_data())],
    };

    // First delivery executes.
    runtime.process_entry(entry.clone()).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // Second delivery of the same msg_id: lock held → ack, no execution.
    runtime.process_entry(entry).await;
    assert_eq!(
        invocations.load(Ordering::SeqCst),
        1,
        "duplicate delivery must not invoke the agent"
    );
    assert_eq!(captured.count_of("duplicate_delivery"), 1);

    // Exactly one result for the task id.
    let results: Vec<TaskResult> = store
        .read_range("agentic:rag:results", "-", "+", 100)
        .await
        .unwrap()
        .iter()
        .filter_map(|e| TaskResult::from_data(data_field(&e.fields).ok()?).ok())
        .collect();
    let matching: Vec<_> = results.iter().filter(|r| r.task_id == task.task_id).collect();
    assert_eq!(matching.len(), 1);
}
