//! Request/response bodies for the daemon's HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use weft_envelope::TaskResult;
use weft_persist::OpMetric;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// One domain's stream health: group stats on the task stream.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub domain: String,
    pub tasks_stream: String,
    pub pending: u64,
    pub consumers: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistMetric {
    pub op: String,
    pub table: String,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
}

impl From<OpMetric> for PersistMetric {
    fn from(m: OpMetric) -> Self {
        Self {
            op: m.op,
            table: m.table,
            count: m.count,
            errors: m.errors,
            avg_ms: m.avg_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub config_hash: String,
    pub flows: Vec<String>,
    pub domains: Vec<DomainStatus>,
    pub persist_metrics: Vec<PersistMetric>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub flow: String,
    #[serde(default)]
    pub payload: Value,
    /// When set, the handler polls the results stream up to this long and
    /// inlines the result.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub task_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
