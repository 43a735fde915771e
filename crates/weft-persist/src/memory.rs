//! Deterministic in-memory backend.
//!
//! Used by tests, single-node runs, and anywhere a real table service is
//! not wired. Semantics are the reference for the adapter contract:
//! auto-incrementing integer `id` when absent, O(n) scans, stable ordering
//! (ties keep insertion order), and upsert as merge keyed by the conflict
//! column set.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::adapter::{PersistenceAdapter, QueryOptions, Row};
use crate::error::PersistError;
use crate::filter::{check_capabilities, row_matches, Capabilities};

#[derive(Default)]
struct TableData {
    rows: Vec<Row>,
    next_id: i64,
}

/// In-memory adapter. Cheap to clone the handle (`Arc` it); all state lives
/// behind one `RwLock`.
#[derive(Default)]
pub struct MemoryAdapter {
    tables: RwLock<HashMap<String, TableData>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: load rows verbatim (ids assigned if missing).
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.tables.write().await;
        let data = tables.entry(table.to_string()).or_default();
        for mut row in rows {
            assign_id(data, &mut row);
            data.rows.push(row);
        }
    }

    /// Total row count for a table (tests).
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|d| d.rows.len())
            .unwrap_or(0)
    }
}

fn assign_id(data: &mut TableData, row: &mut Row) {
    match row.get("id") {
        Some(v) if !v.is_null() => {
            // Keep explicit ids, but keep the counter ahead of numeric ones.
            if let Some(n) = v.as_i64() {
                data.next_id = data.next_id.max(n);
            }
        }
        _ => {
            data.next_id += 1;
            row.insert("id".to_string(), Value::from(data.next_id));
        }
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn project(row: &Row, select: &Option<Vec<String>>) -> Row {
    match select {
        None => row.clone(),
        Some(cols) => cols
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect(),
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn write(&self, table: &str, record: Row) -> Result<Row, PersistError> {
        let mut tables = self.tables.write().await;
        let data = tables.entry(table.to_string()).or_default();
        let mut row = record;
        assign_id(data, &mut row);
        data.rows.push(row.clone());
        Ok(row)
    }

    async fn batch_write(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, PersistError> {
        let mut tables = self.tables.write().await;
        let data = tables.entry(table.to_string()).or_default();
        let mut stored = Vec::with_capacity(rows.len());
        for mut row in rows {
            assign_id(data, &mut row);
            data.rows.push(row.clone());
            stored.push(row);
        }
        Ok(stored)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: Option<&str>,
    ) -> Result<Row, PersistError> {
        let keys: Vec<&str> = on_conflict
            .unwrap_or("id")
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(PersistError::Validation("empty on_conflict key set".into()));
        }

        let mut tables = self.tables.write().await;
        let data = tables.entry(table.to_string()).or_default();

        let conflict = data.rows.iter().position(|existing| {
            keys.iter()
                .all(|k| match (existing.get(*k), row.get(*k)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                })
        });

        match conflict {
            Some(i) => {
                let existing = &mut data.rows[i];
                for (k, v) in &row {
                    existing.insert(k.clone(), v.clone());
                }
                Ok(existing.clone())
            }
            None => {
                let mut fresh = row;
                assign_id(data, &mut fresh);
                data.rows.push(fresh.clone());
                Ok(fresh)
            }
        }
    }

    async fn read(
        &self,
        table: &str,
        id: &Value,
        id_col: &str,
    ) -> Result<Option<Row>, PersistError> {
        let tables = self.tables.read().await;
        let Some(data) = tables.get(table) else {
            return Ok(None);
        };
        Ok(data
            .rows
            .iter()
            .find(|r| r.get(id_col).map(|v| loose_eq(v, id)).unwrap_or(false))
            .cloned())
    }

    async fn query(&self, table: &str, opts: &QueryOptions) -> Result<Vec<Row>, PersistError> {
        check_capabilities(&opts.filters, &self.capabilities())?;

        let tables = self.tables.read().await;
        let Some(data) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<&Row> = data
            .rows
            .iter()
            .filter(|r| row_matches(r, &opts.filters))
            .collect();

        if let Some(col) = &opts.order_by {
            // Stable sort: equal keys keep insertion order.
            hits.sort_by(|a, b| {
                let ord = cmp_values(
                    a.get(col).unwrap_or(&Value::Null),
                    b.get(col).unwrap_or(&Value::Null),
                );
                if opts.desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let offset = opts.offset.unwrap_or(0);
        let page: Vec<Row> = hits
            .into_iter()
            .skip(offset)
            .take(opts.limit.unwrap_or(usize::MAX))
            .map(|r| project(r, &opts.select))
            .collect();
        Ok(page)
    }

    async fn get_columns(&self, table: &str) -> Result<Option<Vec<String>>, PersistError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|d| {
            d.rows.first().map(|r| r.keys().cloned().collect())
        }))
    }
}

/// Equality with string/number tolerance, mirroring filter matching.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s == &n.to_string()
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
