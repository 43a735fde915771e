//! Thin ingress: turn a flow trigger into a published task.
//!
//! `ingest` assigns the task UUID, publishes onto the flow's domain task
//! stream (with the configured trim target) and returns the id immediately.
//! Waiting for the result is optional and implemented as a bounded poll of
//! the paired results stream, filtered by `task_id` — there is no exception
//! channel across the stream boundary, so this is the only way back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use weft_envelope::{data_field, Task, TaskResult, DATA_FIELD};
use weft_stream::{Keyspace, StreamError, StreamStore};

use crate::registry::AgentRegistry;

/// How often `wait_for_result` re-scans the results stream.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// IngressError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
    /// No agent is registered for the flow.
    FlowUnknown(String),
    Stream(StreamError),
}

impl std::fmt::Display for IngressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngressError::FlowUnknown(flow) => write!(f, "unknown flow '{flow}'"),
            IngressError::Stream(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for IngressError {}

impl From<StreamError> for IngressError {
    fn from(e: StreamError) -> Self {
        IngressError::Stream(e)
    }
}

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Ingress {
    store: Arc<dyn StreamStore>,
    registry: AgentRegistry,
    keyspace: Keyspace,
    maxlen: Option<usize>,
}

impl Ingress {
    pub fn new(
        store: Arc<dyn StreamStore>,
        registry: AgentRegistry,
        keyspace: Keyspace,
        maxlen: Option<usize>,
    ) -> Self {
        Self {
            store,
            registry,
            keyspace,
            maxlen,
        }
    }

    /// Publish a task for `flow` and return its id.
    pub async fn ingest(&self, flow: &str, payload: Value) -> Result<Uuid, IngressError> {
        let domain = self
            .registry
            .domain_of(flow)
            .ok_or_else(|| IngressError::FlowUnknown(flow.to_string()))?;

        let task = Task::new(flow, payload);
        let stream = self.keyspace.tasks(domain);
        self.store
            .publish(
                &stream,
                vec![(DATA_FIELD.to_string(), task.to_data())],
                self.maxlen,
            )
            .await?;
        Ok(task.task_id)
    }

    /// Poll the domain's results stream for `task_id`, up to `timeout`.
    /// `None` means the window elapsed without a result; the caller's
    /// polling window must stay well below the stream's trim horizon.
    pub async fn wait_for_result(
        &self,
        domain: &str,
        task_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<TaskResult>, IngressError> {
        let stream = self.keyspace.results(domain);
        let deadline = Instant::now() + timeout;

        loop {
            let entries = self.store.read_range(&stream, "-", "+", 1000).await?;
            for entry in &entries {
                if let Ok(data) = data_field(&entry.fields) {
                    if let Ok(result) = TaskResult::from_data(data) {
                        if result.task_id == task_id {
                            return Ok(Some(result));
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RESULT_POLL_INTERVAL).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryBuilder, TaskAgent};
    use async_trait::async_trait;
    use serde_json::json;
    use weft_envelope::Envelope;
    use weft_stream::MemoryStreams;

    struct NullAgent;

    #[async_trait]
    impl TaskAgent for NullAgent {
        fn name(&self) -> &'static str {
            "null"
        }
        fn domain(&self) -> &'static str {
            "rag"
        }
        async fn handle(&self, task: &Task) -> Result<Envelope, crate::AgentFailure> {
            Ok(Envelope::from_records("null", vec![], task.task_id))
        }
    }

    fn ingress(store: Arc<MemoryStreams>) -> Ingress {
        let registry = RegistryBuilder::new()
            .register("rag.retrieve", Arc::new(NullAgent))
            .unwrap()
            .build();
        Ingress::new(store, registry, Keyspace::new("agentic"), Some(1000))
    }

    #[tokio::test]
    async fn ingest_publishes_to_the_domain_task_stream() {
        let store = Arc::new(MemoryStreams::new());
        let ing = ingress(Arc::clone(&store));

        let task_id = ing
            .ingest("rag.retrieve", json!({"prompt": "find leads"}))
            .await
            .unwrap();

        let entries = store
            .read_range("agentic:rag:tasks", "-", "+", 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let task = Task::from_data(data_field(&entries[0].fields).unwrap()).unwrap();
        assert_eq!(task.task_id, task_id);
        assert_eq!(task.flow, "rag.retrieve");
        assert_eq!(task.meta.attempt, 0);
    }

    #[tokio::test]
    async fn unknown_flow_is_rejected_without_publishing() {
        let store = Arc::new(MemoryStreams::new());
        let ing = ingress(Arc::clone(&store));

        let err = ing.ingest("nope", json!({})).await.unwrap_err();
        assert_eq!(err, IngressError::FlowUnknown("nope".into()));
        assert_eq!(store.stream_len("agentic:rag:tasks").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wait_for_result_finds_matching_task_id() {
        let store = Arc::new(MemoryStreams::new());
        let ing = ingress(Arc::clone(&store));
        let task_id = Uuid::new_v4();

        // Unrelated result first; ours second.
        let other = TaskResult::failure(Uuid::new_v4(), "other");
        store
            .publish(
                "agentic:rag:results",
                vec![(DATA_FIELD.to_string(), other.to_data())],
                None,
            )
            .await
            .unwrap();
        let ours = TaskResult::failure(task_id, "mine");
        store
            .publish(
                "agentic:rag:results",
                vec![(DATA_FIELD.to_string(), ours.to_data())],
                None,
            )
            .await
            .unwrap();

        let found = ing
            .wait_for_result("rag", task_id, Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.task_id, task_id);
    }

    #[tokio::test]
    async fn wait_for_result_times_out_to_none() {
        let store = Arc::new(MemoryStreams::new());
        let ing = ingress(store);
        let found = ing
            .wait_for_result("rag", Uuid::new_v4(), Duration::from_millis(60))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
