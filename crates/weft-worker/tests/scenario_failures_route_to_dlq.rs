//! Scenario: Failure Routing
//!
//! # Invariants under test
//! - Transient failures retry up to `max_retries`, then dead-letter: one
//!   DLQ entry, one error result, attempts observed = retries + 1.
//! - Terminal failures skip retry entirely: the agent runs once.
//! - An unknown flow never reaches any agent and dead-letters immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use weft_envelope::{data_field, Envelope, EnvelopeStatus, Task, TaskResult, DATA_FIELD};
use weft_monitor::Monitor;
use weft_registry::{AgentFailure, RegistryBuilder, TaskAgent};
use weft_stream::{Keyspace, MemoryStreams, StreamStore};
use weft_worker::{shutdown_channel, Dispatcher, ShutdownHandle, WorkerConfig, WorkerRuntime};

/// Fails every invocation, transiently or terminally.
struct FailingAgent {
    invocations: Arc<AtomicUsize>,
    transient: bool,
}

#[async_trait]
impl TaskAgent for FailingAgent {
    fn name(&self) -> &'static str {
        "failing"
    }
    fn domain(&self) -> &'static str {
        "rag"
    }
    async fn handle(&self, _task: &Task) -> Result<Envelope, AgentFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.transient {
            Err(AgentFailure::transient("backend timeout"))
        } else {
            Err(AgentFailure::terminal("schema mismatch"))
        }
    }
}

struct Harness {
    store: Arc<MemoryStreams>,
    invocations: Arc<AtomicUsize>,
    handle: ShutdownHandle,
    run: tokio::task::JoinHandle<Result<(), weft_worker::WorkerError>>,
}

async fn start(transient: bool, max_retries: u32) -> Harness {
    let store = Arc::new(MemoryStreams::new());
    store
        .create_group("agentic:rag:tasks", "rag-workers", "$")
        .await
        .unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .register(
            "rag.fail",
            Arc::new(FailingAgent {
                invocations: Arc::clone(&invocations),
                transient,
            }),
        )
        .unwrap()
        .build();

    let mut cfg = WorkerConfig::for_domain(&weft_config::Config::default(), "rag");
    cfg.claim_block = Duration::from_millis(50);
    cfg.retry_backoff = Duration::from_millis(0);
    cfg.max_retries = max_retries;
    cfg.hb_enabled = false;

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
    Harness {
        store,
        invocations,
        handle,
        run,
    }
}

async fn publish(store: &MemoryStreams, task: &Task) {
    store
        .publish(
            "agentic:rag:tasks",
            vec![(DATA_FIELD.to_string(), task.to_data())],
            None,
        )
        .await
        .unwrap();
}

async fn wait_for_dlq(store: &MemoryStreams) -> Vec<(String, String)> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let entries = store.read_range("agentic:rag:dlq", "-", "+", 100).await.unwrap();
        if !entries.is_empty() {
            return entries[0].fields.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for DLQ entry"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn results(store: &MemoryStreams, task_id: uuid::Uuid) -> Vec<TaskResult> {
    store
        .read_range("agentic:rag:results", "-", "+", 100)
        .await
        .unwrap()
        .iter()
        .filter_map(|e| TaskResult::from_data(data_field(&e.fields).ok()?).ok())
        .filter(|r| r.task_id == task_id)
        .collect()
}

#[tokio::test]
async fn transient_failures_retry_until_exhausted_then_dead_letter() {
    let h = start(true, 2).await;
    let task = Task::new("rag.fail", json!({}));
    publish(&h.store, &task).await;

    wait_for_dlq(&h.store).await;

    // Attempts 0, 1, 2 → three invocations.
    assert_eq!(h.invocations.load(Ordering::SeqCst), 3);

    let rs = results(&h.store, task.task_id).await;
    assert_eq!(rs.len(), 1, "one terminal error result");
    assert_eq!(rs[0].status, EnvelopeStatus::Error);
    assert!(rs[0].error.as_deref().unwrap().contains("backend timeout"));

    h.handle.shutdown();
    h.run.await.unwrap().unwrap();
}

#[tokio::test]
async fn terminal_failures_skip_retry() {
    let h = start(false, 5).await;
    let task = Task::new("rag.fail", json!({}));
    publish(&h.store, &task).await;

    let dlq_fields = wait_for_dlq(&h.store).await;
    assert_eq!(h.invocations.load(Ordering::SeqCst), 1, "no retries");
    assert!(dlq_fields
        .iter()
        .any(|(k, v)| k == "reason" && v.contains("schema mismatch")));

    h.handle.shutdown();
    h.run.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_flow_dead_letters_without_touching_agents() {
    let h = start(true, 2).await;
    let task = Task::new("rag.ghost", json!({}));
    publish(&h.store, &task).await;

    wait_for_dlq(&h.store).await;
    assert_eq!(h.invocations.load(Ordering::SeqCst), 0);

    let rs = results(&h.store, task.task_id).await;
    assert_eq!(rs.len(), 1);
    assert!(rs[0].error.as_deref().unwrap().contains("FlowUnknown"));

    h.handle.shutdown();
    h.run.await.unwrap().unwrap();
}
