//! Remote REST table-service backend.
//!
//! Speaks the PostgREST-style convention: filters as query-string operators
//! (`col=eq.v`, `col=ilike.*v*`, `col=in.(a,b)`, `col=gte.v`), pagination as
//! `limit`/`offset`, upsert via `Prefer: resolution=merge-duplicates`.
//! Network failures and 5xx/429 responses map to transient adapter errors;
//! other 4xx responses are permanent.

use async_trait::async_trait;
use serde_json::Value;

use crate::adapter::{PersistenceAdapter, QueryOptions, Row};
use crate::error::PersistError;
use crate::filter::{check_capabilities, Capabilities, Filter};

/// Remote adapter over a PostgREST-style table service.
pub struct RestAdapter {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RestAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let mut rb = self.client.request(method, self.url(table));
        if let Some(key) = &self.api_key {
            rb = rb.header("apikey", key).bearer_auth(key);
        }
        rb
    }

    /// Issue the request and decode the row payload. The service returns
    /// either a JSON array or a single object; both normalize to `Vec<Row>`.
    async fn execute(&self, rb: reqwest::RequestBuilder) -> Result<Vec<Row>, PersistError> {
        let resp = rb.send().await.map_err(|e| PersistError::Adapter {
            message: format!("transport: {e}"),
            transient: true,
        })?;

        let status = resp.status();
        if !status.is_success() {
            let transient = status.is_server_error() || status.as_u16() == 429;
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistError::Adapter {
                message: format!("status {status}: {}", snippet(&body)),
                transient,
            });
        }

        let value: Value = resp.json().await.map_err(|e| PersistError::Adapter {
            message: format!("decode: {e}"),
            transient: false,
        })?;

        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Object(m) => Ok(m),
                    other => Err(PersistError::Adapter {
                        message: format!("expected row object, got {other}"),
                        transient: false,
                    }),
                })
                .collect(),
            Value::Object(m) => Ok(vec![m]),
            Value::Null => Ok(Vec::new()),
            other => Err(PersistError::Adapter {
                message: format!("expected rows, got {other}"),
                transient: false,
            }),
        }
    }
}

/// Render one filter as a query-string pair.
fn filter_param(f: &Filter) -> (String, String) {
    match f {
        Filter::Eq { col, value } => (col.clone(), format!("eq.{}", scalar(value))),
        Filter::Ilike { col, pattern } => {
            // The wire convention uses `*` as the wildcard.
            (col.clone(), format!("ilike.{}", pattern.replace('%', "*")))
        }
        Filter::In { col, values } => {
            let items: Vec<String> = values.iter().map(scalar).collect();
            (col.clone(), format!("in.({})", items.join(",")))
        }
        Filter::Range { col, cmp, value } => {
            (col.clone(), format!("{}.{}", cmp.rest_token(), scalar(value)))
        }
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query_params(opts: &QueryOptions) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = opts.filters.iter().map(filter_param).collect();
    if let Some(cols) = &opts.select {
        params.push(("select".into(), cols.join(",")));
    }
    if let Some(col) = &opts.order_by {
        let dir = if opts.desc { "desc" } else { "asc" };
        params.push(("order".into(), format!("{col}.{dir}")));
    }
    if let Some(limit) = opts.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    if let Some(offset) = opts.offset {
        params.push(("offset".into(), offset.to_string()));
    }
    params
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

#[async_trait]
impl PersistenceAdapter for RestAdapter {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn write(&self, table: &str, record: Row) -> Result<Row, PersistError> {
        let rows = self
            .execute(
                self.request(reqwest::Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(&Value::Object(record)),
            )
            .await?;
        rows.into_iter().next().ok_or(PersistError::Adapter {
            message: "write returned no representation".into(),
            transient: false,
        })
    }

    async fn batch_write(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, PersistError> {
        let body: Vec<Value> = rows.into_iter().map(Value::Object).collect();
        self.execute(
            self.request(reqwest::Method::POST, table)
                .header("Prefer", "return=representation")
                .json(&body),
        )
        .await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: Option<&str>,
    ) -> Result<Row, PersistError> {
        let mut rb = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&Value::Object(row));
        if let Some(keys) = on_conflict {
            rb = rb.query(&[("on_conflict", keys)]);
        }
        let rows = self.execute(rb).await?;
        rows.into_iter().next().ok_or(PersistError::Adapter {
            message: "upsert returned no representation".into(),
            transient: false,
        })
    }

    async fn read(
        &self,
        table: &str,
        id: &Value,
        id_col: &str,
    ) -> Result<Option<Row>, PersistError> {
        let opts = QueryOptions::filtered(vec![Filter::Eq {
            col: id_col.to_string(),
            value: id.clone(),
        }])
        .with_page(1, 0);
        Ok(self.query(table, &opts).await?.into_iter().next())
    }

    async fn query(&self, table: &str, opts: &QueryOptions) -> Result<Vec<Row>, PersistError> {
        check_capabilities(&opts.filters, &self.capabilities())?;
        self.execute(
            self.request(reqwest::Method::GET, table)
                .query(&query_params(opts)),
        )
        .await
    }

    async fn get_columns(&self, table: &str) -> Result<Option<Vec<String>>, PersistError> {
        let rows = self
            .query(table, &QueryOptions::default().with_page(1, 0))
            .await?;
        Ok(rows.first().map(|r| r.keys().cloned().collect()))
    }
}

// ---------------------------------------------------------------------------
// Unit tests (httpmock)
// ---------------------------------------------------------------------------
