//! Read-only facade over the persistence service.
//!
//! Retrieval paths receive this type, never the service itself. Write-shaped
//! calls fail before reaching the service, and the wrapped service is a
//! [`PersistenceService::read_only_view`] whose write allowlist is empty, so
//! even a facade bypass cannot mutate state.

use serde_json::Value;

use crate::adapter::{QueryOptions, Row};
use crate::error::PersistError;
use crate::filter::Capabilities;
use crate::service::PersistenceService;

#[derive(Clone)]
pub struct ReadOnlyFacade {
    service: PersistenceService,
}

impl ReadOnlyFacade {
    /// Wrap a service. The facade holds the service's read-only view, not
    /// the service itself.
    pub fn over(service: &PersistenceService) -> Self {
        Self {
            service: service.read_only_view(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.service.capabilities()
    }

    pub async fn read(
        &self,
        table: &str,
        id: &Value,
        id_col: &str,
    ) -> Result<Option<Row>, PersistError> {
        self.service.read(table, id, id_col).await
    }

    pub async fn query(&self, table: &str, opts: &QueryOptions) -> Result<Vec<Row>, PersistError> {
        self.service.query(table, opts).await
    }

    pub async fn get_columns(&self, table: &str) -> Result<Option<Vec<String>>, PersistError> {
        self.service.get_columns(table).await
    }

    /// Always fails; the facade is read-only.
    pub async fn write(&self, _table: &str, _record: Row) -> Result<Row, PersistError> {
        Err(PersistError::Permission { op: "write" })
    }

    /// Always fails; the facade is read-only.
    pub async fn batch_write(
        &self,
        _table: &str,
        _rows: Vec<Row>,
    ) -> Result<Vec<Row>, PersistError> {
        Err(PersistError::Permission { op: "batch_write" })
    }

    /// Always fails; the facade is read-only.
    pub async fn upsert(
        &self,
        _table: &str,
        _row: Row,
        _on_conflict: Option<&str>,
    ) -> Result<Row, PersistError> {
        Err(PersistError::Permission { op: "upsert" })
    }

    /// The wrapped read-only view (tests assert its write allowlist stays
    /// empty).
    pub fn service(&self) -> &PersistenceService {
        &self.service
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use weft_monitor::Monitor;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn facade_over_writable_service() -> (ReadOnlyFacade, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter
            .seed("leads", vec![row(&[("email", json!("a@x.io"))])])
            .await;
        // The parent service CAN write to leads; the facade must not.
        let svc = PersistenceService::new(
            Arc::clone(&adapter) as Arc<_>,
            set(&["leads"]),
            set(&["leads"]),
            Monitor::new(),
        );
        (ReadOnlyFacade::over(&svc), adapter)
    }

    #[tokio::test]
    async fn write_shaped_calls_fail_with_permission_error() {
        let (facade, adapter) = facade_over_writable_service().await;

        let err = facade
            .write("leads", row(&[("email", json!("evil@x.io"))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PersistencePermissionError");

        let err = facade
            .batch_write("leads", vec![row(&[("email", json!("evil@x.io"))])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PersistencePermissionError");

        let err = facade
            .upsert("leads", row(&[("email", json!("evil@x.io"))]), Some("email"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PersistencePermissionError");

        // Nothing reached the adapter: the seeded row is still alone.
        assert_eq!(adapter.len("leads").await, 1);
    }

    #[tokio::test]
    async fn reads_forward_to_the_service() {
        let (facade, _adapter) = facade_over_writable_service().await;

        let rows = facade.query("leads", &QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);

        let cols = facade.get_columns("leads").await.unwrap().unwrap();
        assert!(cols.contains(&"email".to_string()));
    }

    #[tokio::test]
    async fn wrapped_service_write_allowlist_is_empty() {
        let (facade, _adapter) = facade_over_writable_service().await;
        assert!(facade.service().write_allowlist().is_empty());

        // Defense in depth: even going through the wrapped service directly,
        // writes are refused by the empty allowlist.
        let err = facade
            .service()
            .write("leads", row(&[("email", json!("x@x.io"))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TableNotAllowedError");
    }
}
