//! Redacted structured event emission.
//!
//! Components emit operational events through a [`Monitor`] handle instead
//! of logging ad hoc. Every payload passes through [`redact`] before it can
//! reach a sink, so secrets in task payloads or adapter rows never land in
//! logs. The fabric emits events; it does not store them.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Value substituted for any redacted field.
pub const REDACTED: &str = "[REDACTED]";

/// String payload values longer than this are truncated before emission.
const MAX_STRING_LEN: usize = 2048;

/// Key fragments (lowercase) that mark a field as sensitive.
const SENSITIVE_KEY_PARTS: &[&str] = &["password", "token", "secret", "api_key", "authorization"];

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

/// One emitted event. `payload` is already redacted.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Cloneable emission handle. The default sink writes one structured
/// `tracing` event per emission; the capture sink buffers events for test
/// assertions.
#[derive(Clone)]
pub struct Monitor {
    capture: Option<Arc<Mutex<Vec<MonitorEvent>>>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Production monitor: events go to `tracing`.
    pub fn new() -> Self {
        Self { capture: None }
    }

    /// Capturing monitor for tests; the returned handle reads back what was
    /// emitted.
    pub fn capturing() -> (Self, CapturedEvents) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                capture: Some(Arc::clone(&buf)),
            },
            CapturedEvents(buf),
        )
    }

    /// Emit one event. The payload is redacted before it reaches any sink.
    pub fn emit(&self, topic: &str, event_type: &str, payload: Value) {
        let event = MonitorEvent {
            ts_utc: Utc::now(),
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload: redact(&payload),
        };
        match &self.capture {
            Some(buf) => buf.lock().expect("monitor buffer poisoned").push(event),
            None => {
                info!(
                    topic = event.topic.as_str(),
                    event_type = event.event_type.as_str(),
                    payload = %event.payload,
                    "monitor event"
                );
            }
        }
    }
}

/// Read-back handle paired with a capturing [`Monitor`].
#[derive(Clone)]
pub struct CapturedEvents(Arc<Mutex<Vec<MonitorEvent>>>);

impl CapturedEvents {
    pub fn snapshot(&self) -> Vec<MonitorEvent> {
        self.0.lock().expect("monitor buffer poisoned").clone()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

/// Recursively replace sensitive values and truncate oversized strings.
///
/// A field is sensitive when its key contains any of
/// `password | token | secret | api_key | authorization` (case-insensitive).
pub fn redact(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact).collect()),
        Value::String(s) if s.len() > MAX_STRING_LEN => {
            let mut cut = s.chars().take(MAX_STRING_LEN).collect::<String>();
            cut.push_str("…[truncated]");
            Value::String(cut)
        }
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|p| lower.contains(p))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_redacted_recursively() {
        let payload = json!({
            "user": "a@x.io",
            "password": "hunter2",
            "nested": {"api_key": "sk-123", "ok": 1},
            "list": [{"auth_token": "t"}]
        });
        let red = redact(&payload);
        assert_eq!(red["password"], REDACTED);
        assert_eq!(red["nested"]["api_key"], REDACTED);
        assert_eq!(red["list"][0]["auth_token"], REDACTED);
        assert_eq!(red["user"], "a@x.io");
        assert_eq!(red["nested"]["ok"], 1);
    }

    #[test]
    fn oversized_strings_are_truncated() {
        let long = "x".repeat(MAX_STRING_LEN + 10);
        let red = redact(&json!({ "body": long }));
        let s = red["body"].as_str().unwrap();
        assert!(s.ends_with("…[truncated]"));
        assert!(s.chars().count() < MAX_STRING_LEN + 20);
    }

    #[test]
    fn capture_sink_records_redacted_events() {
        let (monitor, captured) = Monitor::capturing();
        monitor.emit("persist", "op", json!({"table": "leads", "token": "nope"}));

        let events = captured.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, "persist");
        assert_eq!(events[0].payload["token"], REDACTED);
        assert_eq!(captured.count_of("op"), 1);
    }
}
