//! Write agent: insert / upsert / batch through the persistence service.
//!
//! The one agent in the fabric that holds a writable service handle. Every
//! outcome is an envelope; permission and allowlist failures are terminal
//! by contract (publishing a retry for them would just fail again), while
//! transient backend trouble propagates to the runtime's retry policy.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use weft_envelope::{Envelope, Task};
use weft_persist::{PersistenceService, Row};
use weft_registry::{AgentFailure, TaskAgent};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WriteOp {
    Write,
    BatchWrite,
    Upsert,
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    op: WriteOp,
    table: String,
    #[serde(default)]
    record: Option<Row>,
    #[serde(default)]
    records: Option<Vec<Row>>,
    #[serde(default)]
    on_conflict: Option<String>,
}

// ---------------------------------------------------------------------------
// WriteAgent
// ---------------------------------------------------------------------------

pub struct WriteAgent {
    service: PersistenceService,
}

impl WriteAgent {
    pub fn new(service: PersistenceService) -> Self {
        Self { service }
    }

    fn source(table: &str) -> String {
        format!("persistence.{table}")
    }

    async fn execute(&self, task: &Task, req: WriteRequest) -> Result<Envelope, AgentFailure> {
        let source = Self::source(&req.table);

        let result = match req.op {
            WriteOp::Write => match req.record {
                Some(record) => self
                    .service
                    .write(&req.table, record)
                    .await
                    .map(|row| vec![row]),
                None => {
                    return Ok(Envelope::error(
                        &source,
                        task.task_id,
                        "ValidationError: write requires a record",
                    ))
                }
            },
            WriteOp::BatchWrite => match req.records {
                Some(records) => self.service.batch_write(&req.table, records).await,
                None => {
                    return Ok(Envelope::error(
                        &source,
                        task.task_id,
                        "ValidationError: batch_write requires records",
                    ))
                }
            },
            WriteOp::Upsert => match req.record {
                Some(record) => self
                    .service
                    .upsert(&req.table, record, req.on_conflict.as_deref())
                    .await
                    .map(|row| vec![row]),
                None => {
                    return Ok(Envelope::error(
                        &source,
                        task.task_id,
                        "ValidationError: upsert requires a record",
                    ))
                }
            },
        };

        match result {
            Ok(rows) => Ok(Envelope::from_records(&source, rows, task.task_id)),
            Err(e) if e.is_transient() => Err(AgentFailure::transient(e.to_string())),
            // Permission / allowlist / validation / permanent adapter
            // failures: terminal, no retry.
            Err(e) => Ok(Envelope::error(&source, task.task_id, e.to_string())),
        }
    }
}

#[async_trait]
impl TaskAgent for WriteAgent {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn domain(&self) -> &'static str {
        "persist"
    }

    async fn handle(&self, task: &Task) -> Result<Envelope, AgentFailure> {
        let req: WriteRequest = match serde_json::from_value(task.payload.clone()) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Envelope::error(
                    "persistence",
                    task.task_id,
                    format!("ValidationError: bad write payload: {e}"),
                ))
            }
        };
        self.execute(task, req).await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
