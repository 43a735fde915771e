//! Task and result wire types.
//!
//! Stream entries carry a single field named [`DATA_FIELD`] whose value is
//! the JSON serialization of a [`Task`] or [`TaskResult`]. `task_id` is the
//! idempotency key across the whole fabric: callers must treat results as
//! idempotent per task id, because a terminal result can be published more
//! than once if an idempotency lock expires before the publish lands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::{Envelope, EnvelopeStatus};

/// Stream entry field under which task/result JSON is stored.
pub const DATA_FIELD: &str = "data";

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Delivery metadata attached to every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub enqueued_at: DateTime<Utc>,
    /// 0 on first publish; incremented on every retry re-publish.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_delivery: Option<bool>,
}

/// One unit of work, published to `{ns}:{domain}:tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub flow: String,
    pub payload: Value,
    pub meta: TaskMeta,
}

impl Task {
    /// New task with a fresh UUID and attempt 0.
    pub fn new(flow: impl Into<String>, payload: Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            flow: flow.into(),
            payload,
            meta: TaskMeta {
                enqueued_at: Utc::now(),
                attempt: 0,
                allow_delivery: None,
            },
        }
    }

    /// Clone of this task with `attempt + 1`, for retry re-publish.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.meta.attempt += 1;
        next
    }

    /// Serialize to the stream entry `data` field.
    pub fn to_data(&self) -> String {
        serde_json::to_string(self).expect("task serialization must not fail")
    }

    /// Parse from a stream entry `data` field.
    pub fn from_data(data: &str) -> Result<Self, WireError> {
        serde_json::from_str(data).map_err(|e| WireError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Terminal outcome for a task, published to `{ns}:{domain}:results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Success or error according to the envelope's own status.
    pub fn from_envelope(task_id: Uuid, envelope: Envelope) -> Self {
        Self {
            task_id,
            status: envelope.status,
            error: envelope.error.clone(),
            envelope: Some(envelope),
        }
    }

    /// Terminal failure with no envelope (e.g. unknown flow, malformed task).
    pub fn failure(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: EnvelopeStatus::Error,
            envelope: None,
            error: Some(error.into()),
        }
    }

    pub fn to_data(&self) -> String {
        serde_json::to_string(self).expect("result serialization must not fail")
    }

    pub fn from_data(data: &str) -> Result<Self, WireError> {
        serde_json::from_str(data).map_err(|e| WireError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// A stream entry whose `data` field could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    Malformed(String),
    /// The entry had no `data` field at all.
    MissingDataField,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Malformed(msg) => write!(f, "malformed entry data: {msg}"),
            WireError::MissingDataField => write!(f, "stream entry has no data field"),
        }
    }
}

impl std::error::Error for WireError {}

/// Extract the `data` field from decoded stream entry fields.
pub fn data_field(fields: &[(String, String)]) -> Result<&str, WireError> {
    fields
        .iter()
        .find(|(k, _)| k == DATA_FIELD)
        .map(|(_, v)| v.as_str())
        .ok_or(WireError::MissingDataField)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_round_trips_through_data_field() {
        let task = Task::new("rag.retrieve", json!({"prompt": "find leads at acme"}));
        let decoded = Task::from_data(&task.to_data()).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(decoded.meta.attempt, 0);
    }

    #[test]
    fn next_attempt_increments_only_attempt() {
        let task = Task::new("rag.retrieve", json!({}));
        let retry = task.next_attempt();
        assert_eq!(retry.task_id, task.task_id);
        assert_eq!(retry.meta.attempt, 1);
        assert_eq!(retry.meta.enqueued_at, task.meta.enqueued_at);
    }

    #[test]
    fn result_from_error_envelope_is_error_status() {
        let task_id = Uuid::new_v4();
        let env = Envelope::error("agents.persist", task_id, "table not allowed: secrets");
        let result = TaskResult::from_envelope(task_id, env);
        assert_eq!(result.status, EnvelopeStatus::Error);
        assert!(result.error.as_deref().unwrap().contains("secrets"));
    }

    #[test]
    fn malformed_data_is_a_typed_error() {
        let err = Task::from_data("{not json").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[test]
    fn data_field_lookup() {
        let fields = vec![("data".to_string(), "{}".to_string())];
        assert_eq!(data_field(&fields).unwrap(), "{}");

        let none: Vec<(String, String)> = vec![("other".into(), "x".into())];
        assert_eq!(data_field(&none).unwrap_err(), WireError::MissingDataField);
    }
}
