//! Backend adapter contract.
//!
//! Implementations must be object-safe (`Arc<dyn PersistenceAdapter>`) and
//! `Send + Sync` so a single adapter instance can serve every worker task.
//! Adapters translate the filter DSL into their native operator shape and
//! never see a table name that has not already passed the allowlist.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PersistError;
use crate::filter::{Capabilities, Filter};

/// A row is an arbitrary JSON column map.
pub type Row = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// QueryOptions
// ---------------------------------------------------------------------------

/// Shape of a `query` call. All fields optional; an empty value is an
/// unfiltered scan subject to `limit`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Option<String>,
    pub desc: bool,
    /// Column projection; `None` selects everything.
    pub select: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn filtered(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn with_order(mut self, col: impl Into<String>, desc: bool) -> Self {
        self.order_by = Some(col.into());
        self.desc = desc;
        self
    }
}

// ---------------------------------------------------------------------------
// PersistenceAdapter
// ---------------------------------------------------------------------------

/// Backend driver contract. See [`crate::MemoryAdapter`] and
/// [`crate::RestAdapter`] for the two concrete variants.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Short backend name for metrics and monitor events.
    fn name(&self) -> &'static str;

    /// Constant feature set; consulted by higher layers before emitting
    /// operators.
    fn capabilities(&self) -> Capabilities;

    /// Insert one row; returns the stored row (with backend-assigned id).
    async fn write(&self, table: &str, record: Row) -> Result<Row, PersistError>;

    /// Insert many rows; returns the stored rows in input order.
    /// Callers chunk to `capabilities().max_batch_size`.
    async fn batch_write(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, PersistError>;

    /// Insert-or-merge keyed by `on_conflict` columns (comma-separated);
    /// `None` means plain insert semantics.
    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: Option<&str>,
    ) -> Result<Row, PersistError>;

    /// Point lookup by `id_col` (default `"id"`).
    async fn read(&self, table: &str, id: &Value, id_col: &str)
        -> Result<Option<Row>, PersistError>;

    /// Filtered scan. Ordering ties break by insertion order (in-memory) or
    /// the backend's stable sort (remote).
    async fn query(&self, table: &str, opts: &QueryOptions) -> Result<Vec<Row>, PersistError>;

    /// Column names for a table, `None` when unknown (e.g. empty table on a
    /// schemaless backend).
    async fn get_columns(&self, table: &str) -> Result<Option<Vec<String>>, PersistError>;
}
