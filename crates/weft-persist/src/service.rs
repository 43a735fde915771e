//! The persistence choke point.
//!
//! Every operation follows the same sequence: allowlist check first (a
//! rejected table makes zero adapter calls), unset-field stripping on
//! writes, then the adapter call inside an instrumentation wrapper that
//! accumulates per-`(op, table)` latency stats and emits one monitor event.
//!
//! Services are cheap to clone; clones share the adapter, metrics and
//! monitor. [`PersistenceService::read_only_view`] produces a clone whose
//! write allowlist is empty, which is what the read-only facade wraps.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};

use weft_monitor::Monitor;

use crate::adapter::{PersistenceAdapter, QueryOptions, Row};
use crate::error::PersistError;
use crate::filter::Capabilities;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct OpStats {
    count: u64,
    errors: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// Aggregated latency stats for one `(op, table)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMetric {
    pub op: String,
    pub table: String,
    pub count: u64,
    pub errors: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

// ---------------------------------------------------------------------------
// PersistenceService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PersistenceService {
    adapter: Arc<dyn PersistenceAdapter>,
    read_tables: BTreeSet<String>,
    write_tables: BTreeSet<String>,
    metrics: Arc<Mutex<HashMap<(String, String), OpStats>>>,
    monitor: Monitor,
}

impl PersistenceService {
    pub fn new(
        adapter: Arc<dyn PersistenceAdapter>,
        read_tables: BTreeSet<String>,
        write_tables: BTreeSet<String>,
        monitor: Monitor,
    ) -> Self {
        Self {
            adapter,
            read_tables,
            write_tables,
            metrics: Arc::new(Mutex::new(HashMap::new())),
            monitor,
        }
    }

    /// Clone of this service with an **empty** write allowlist. Shares
    /// adapter, metrics and monitor with the parent.
    pub fn read_only_view(&self) -> Self {
        let mut view = self.clone();
        view.write_tables = BTreeSet::new();
        view
    }

    pub fn capabilities(&self) -> Capabilities {
        self.adapter.capabilities()
    }

    /// Tables this service may write. Exposed so tests can assert the
    /// read-only view really is empty.
    pub fn write_allowlist(&self) -> &BTreeSet<String> {
        &self.write_tables
    }

    pub fn read_allowlist(&self) -> &BTreeSet<String> {
        &self.read_tables
    }

    // -- operations ---------------------------------------------------------

    pub async fn write(&self, table: &str, record: Row) -> Result<Row, PersistError> {
        self.check_write(table)?;
        let record = strip_unset(record);
        self.instrumented("write", table, self.adapter.write(table, record))
            .await
    }

    /// Batch insert, chunked to the adapter's `max_batch_size`.
    pub async fn batch_write(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, PersistError> {
        self.check_write(table)?;
        let cap = self.adapter.capabilities().max_batch_size.max(1);
        let mut stored = Vec::with_capacity(rows.len());
        let rows: Vec<Row> = rows.into_iter().map(strip_unset).collect();
        for chunk in rows.chunks(cap) {
            let part = self
                .instrumented(
                    "batch_write",
                    table,
                    self.adapter.batch_write(table, chunk.to_vec()),
                )
                .await?;
            stored.extend(part);
        }
        Ok(stored)
    }

    pub async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: Option<&str>,
    ) -> Result<Row, PersistError> {
        self.check_write(table)?;
        let row = strip_unset(row);
        self.instrumented("upsert", table, self.adapter.upsert(table, row, on_conflict))
            .await
    }

    pub async fn read(
        &self,
        table: &str,
        id: &Value,
        id_col: &str,
    ) -> Result<Option<Row>, PersistError> {
        self.check_read(table)?;
        self.instrumented("read", table, self.adapter.read(table, id, id_col))
            .await
    }

    pub async fn query(&self, table: &str, opts: &QueryOptions) -> Result<Vec<Row>, PersistError> {
        self.check_read(table)?;
        self.instrumented("query", table, self.adapter.query(table, opts))
            .await
    }

    pub async fn get_columns(&self, table: &str) -> Result<Option<Vec<String>>, PersistError> {
        self.check_read(table)?;
        self.instrumented("get_columns", table, self.adapter.get_columns(table))
            .await
    }

    /// Current metrics, sorted by `(op, table)`.
    pub fn metrics_snapshot(&self) -> Vec<OpMetric> {
        let metrics = self.metrics.lock().expect("metrics lock poisoned");
        let mut out: Vec<OpMetric> = metrics
            .iter()
            .map(|((op, table), s)| OpMetric {
                op: op.clone(),
                table: table.clone(),
                count: s.count,
                errors: s.errors,
                avg_ms: if s.count > 0 {
                    s.total_ms / s.count as f64
                } else {
                    0.0
                },
                min_ms: s.min_ms,
                max_ms: s.max_ms,
            })
            .collect();
        out.sort_by(|a, b| (&a.op, &a.table).cmp(&(&b.op, &b.table)));
        out
    }

    // -- internals ----------------------------------------------------------

    fn check_read(&self, table: &str) -> Result<(), PersistError> {
        if self.read_tables.contains(table) {
            Ok(())
        } else {
            Err(PersistError::TableNotAllowed {
                table: table.to_string(),
                op: "read",
            })
        }
    }

    fn check_write(&self, table: &str) -> Result<(), PersistError> {
        if self.write_tables.contains(table) {
            Ok(())
        } else {
            Err(PersistError::TableNotAllowed {
                table: table.to_string(),
                op: "write",
            })
        }
    }

    /// Run one adapter call, record latency, emit a monitor event.
    async fn instrumented<T, F>(&self, op: &str, table: &str, fut: F) -> Result<T, PersistError>
    where
        F: Future<Output = Result<T, PersistError>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            let stats = metrics
                .entry((op.to_string(), table.to_string()))
                .or_default();
            if stats.count == 0 {
                stats.min_ms = elapsed_ms;
                stats.max_ms = elapsed_ms;
            } else {
                stats.min_ms = stats.min_ms.min(elapsed_ms);
                stats.max_ms = stats.max_ms.max(elapsed_ms);
            }
            stats.count += 1;
            stats.total_ms += elapsed_ms;
            if result.is_err() {
                stats.errors += 1;
            }
        }

        self.monitor.emit(
            "persist",
            op,
            json!({
                "table": table,
                "backend": self.adapter.name(),
                "ok": result.is_ok(),
                "ms": elapsed_ms,
            }),
        );

        result
    }
}

/// Drop fields whose value is the unset marker (JSON `null`).
fn strip_unset(row: Row) -> Row {
    row.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
