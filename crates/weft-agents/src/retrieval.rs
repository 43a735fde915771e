//! Deterministic retrieval agent.
//!
//! Pipeline per request: parse (rules first, LLM extraction only when the
//! rules find nothing and a provider exists) → normalize → cache lookup →
//! allowlisted query through the read-only facade → bounded reformulation
//! on empty results → rate-limited LLM fallback → summarization → envelope
//! assembly. The agent holds a [`ReadOnlyFacade`], so no path through here
//! can mutate state.
//!
//! The cache is process-local and correctness-only: concurrent identical
//! queries may both miss, last write wins, restart clears it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use weft_config::RagConfig;
use weft_envelope::{hash_value, Envelope, ReformulationAttempt, Task};
use weft_persist::{filters_to_json, Filter, QueryOptions, ReadOnlyFacade, Row};
use weft_registry::{AgentFailure, TaskAgent};

use crate::extract::parse_filters;
use crate::limiter::SlidingWindow;
use crate::llm::{LlmError, LlmProvider};
use crate::reformulate::relaxations;

/// Bounded re-prompts when the LLM's structured extraction is not valid
/// JSON of the expected shape.
const LLM_PARSE_RETRIES: usize = 2;

/// Filter keys the agent understands; everything else an LLM suggests is
/// dropped.
const FILTER_KEYS: &[&str] = &["id", "email", "company", "client_id"];

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RetrievalRequest {
    #[serde(default)]
    prompt: Option<String>,
    /// Explicit structured filters; wins over prompt parsing.
    #[serde(default)]
    filters: Option<Map<String, Value>>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    include_raw: bool,
    #[serde(default)]
    return_json: bool,
}

// ---------------------------------------------------------------------------
// RetrievalAgent
// ---------------------------------------------------------------------------

pub struct RetrievalAgent {
    facade: ReadOnlyFacade,
    table: String,
    cfg: RagConfig,
    llm: Option<Arc<dyn LlmProvider>>,
    cache: Mutex<HashMap<String, Envelope>>,
    fallbacks: SlidingWindow,
}

impl RetrievalAgent {
    /// `llm: None` means structured-only behavior: no extraction fallback
    /// and no reasoning path, everything else unchanged.
    pub fn new(facade: ReadOnlyFacade, cfg: RagConfig, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let fallbacks = SlidingWindow::new(cfg.max_fallbacks_per_min, Duration::from_secs(60));
        Self {
            facade,
            table: cfg.default_table.clone(),
            cfg,
            llm,
            cache: Mutex::new(HashMap::new()),
            fallbacks,
        }
    }

    fn source(&self) -> String {
        format!("persistence.{}", self.table)
    }

    // -- pipeline -----------------------------------------------------------

    async fn retrieve(
        &self,
        task_id: Uuid,
        req: RetrievalRequest,
    ) -> Result<Envelope, AgentFailure> {
        // 1. Parse: explicit filters win; otherwise rules, then LLM.
        let mut string_filters: BTreeMap<String, String> = BTreeMap::new();
        if let Some(explicit) = &req.filters {
            for (k, v) in explicit {
                string_filters.insert(k.to_ascii_lowercase(), scalar_string(v));
            }
        } else if let Some(prompt) = &req.prompt {
            string_filters = parse_filters(prompt);
            if string_filters.is_empty() {
                if let Some(llm) = &self.llm {
                    string_filters = self.llm_extract(llm, prompt).await;
                }
            }
        }

        // 2. Normalize.
        let limit = req
            .limit
            .unwrap_or(self.cfg.default_limit)
            .clamp(1, self.cfg.max_limit);
        let offset = req.offset.unwrap_or(0);

        if string_filters.is_empty() {
            // 7. Default list before any LLM fallback.
            if self.cfg.default_list_on_empty && req.return_json {
                return self.default_list(task_id, limit, offset, req.include_raw).await;
            }
            return self
                .fallback_or_empty(task_id, &req, &string_filters, limit, offset, Vec::new())
                .await;
        }

        // 3. Cache lookup.
        let caps = self.facade.capabilities();
        let filters = to_dsl(&string_filters, caps.ilike);
        let cache_key = hash_value(&json!({
            "table": self.table,
            "filters": filters_to_json(&filters),
            "limit": limit,
            "offset": offset,
        }));
        if !self.cfg.cache_disabled {
            let hit = self
                .cache
                .lock()
                .expect("retrieval cache poisoned")
                .get(&cache_key)
                .cloned();
            if let Some(mut env) = hit {
                env.metadata.task_id = task_id;
                env.metadata.cache = Some("hit".to_string());
                return Ok(env);
            }
        }

        // 4. Query.
        let rows = match self
            .facade
            .query(
                &self.table,
                &QueryOptions::filtered(filters.clone()).with_page(limit, offset),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) if e.is_transient() => return Err(AgentFailure::transient(e.to_string())),
            Err(e) => return Ok(Envelope::error(&self.source(), task_id, e.to_string())),
        };

        // 5. Reformulation ladder, bounded, first hit wins.
        let mut attempts: Vec<ReformulationAttempt> = Vec::new();
        let mut final_rows = rows;
        let mut used_filters = filters;
        let mut reformulated = false;
        if final_rows.is_empty() {
            for relax in relaxations(&string_filters)
                .into_iter()
                .take(self.cfg.reformulation_max_attempts)
            {
                let relaxed = to_dsl(&relax.filters, caps.ilike);
                let relaxed_rows = match self
                    .facade
                    .query(
                        &self.table,
                        &QueryOptions::filtered(relaxed.clone()).with_page(limit, offset),
                    )
                    .await
                {
                    Ok(rows) => rows,
                    Err(e) if e.is_transient() => {
                        return Err(AgentFailure::transient(e.to_string()))
                    }
                    Err(e) => return Ok(Envelope::error(&self.source(), task_id, e.to_string())),
                };
                attempts.push(ReformulationAttempt {
                    reason: relax.reason.to_string(),
                    filters: serde_json::to_value(&relax.filters)
                        .expect("filter map serialization must not fail"),
                    result_count: relaxed_rows.len(),
                });
                if !relaxed_rows.is_empty() {
                    final_rows = relaxed_rows;
                    used_filters = relaxed;
                    reformulated = true;
                    break;
                }
            }
        }

        // 6. Fallback when deterministic retrieval stayed empty.
        if final_rows.is_empty() {
            return self
                .fallback_or_empty(task_id, &req, &string_filters, limit, offset, attempts)
                .await;
        }

        // 8./9. Summarize and assemble.
        let mut env =
            Envelope::from_records_raw(&self.source(), final_rows, task_id, req.include_raw)
                .with_filters(filters_to_json(&used_filters))
                .with_page(limit, offset)
                .with_reformulation_attempts(attempts);
        if reformulated {
            env = env.with_fallback("reformulation");
        }
        if env.records.len() > self.cfg.summary_threshold {
            let summary = summarize(&env.records);
            env = env.with_summary(summary, self.cfg.summary_threshold);
        }
        if !self.cfg.cache_disabled {
            env.metadata.cache = Some("miss".to_string());
            self.cache
                .lock()
                .expect("retrieval cache poisoned")
                .insert(cache_key, env.clone());
        }
        Ok(env)
    }

    /// Small safe page from the default table (empty-filter policy path).
    async fn default_list(
        &self,
        task_id: Uuid,
        limit: usize,
        offset: usize,
        include_raw: bool,
    ) -> Result<Envelope, AgentFailure> {
        let page = limit.min(self.cfg.default_limit).max(1);
        let rows = match self
            .facade
            .query(&self.table, &QueryOptions::default().with_page(page, offset))
            .await
        {
            Ok(rows) => rows,
            Err(e) if e.is_transient() => return Err(AgentFailure::transient(e.to_string())),
            Err(e) => return Ok(Envelope::error(&self.source(), task_id, e.to_string())),
        };
        Ok(
            Envelope::from_records_raw(&self.source(), rows, task_id, include_raw)
                .with_page(page, offset),
        )
    }

    /// Rate-limited LLM reasoning, suppression, or a plain empty envelope.
    async fn fallback_or_empty(
        &self,
        task_id: Uuid,
        req: &RetrievalRequest,
        string_filters: &BTreeMap<String, String>,
        limit: usize,
        offset: usize,
        attempts: Vec<ReformulationAttempt>,
    ) -> Result<Envelope, AgentFailure> {
        let filters_json =
            serde_json::to_value(string_filters).expect("filter map serialization must not fail");

        if let Some(llm) = &self.llm {
            if self.fallbacks.try_acquire() {
                return self
                    .llm_fallback(llm, task_id, req, filters_json, limit, offset, attempts)
                    .await;
            }
            // Budget exhausted: not an error, by contract.
            return Ok(Envelope::from_records(&self.source(), vec![], task_id)
                .with_filters(filters_json)
                .with_page(limit, offset)
                .with_fallback("suppressed")
                .with_reformulation_attempts(attempts));
        }

        Ok(Envelope::from_records(&self.source(), vec![], task_id)
            .with_filters(filters_json)
            .with_page(limit, offset)
            .with_reformulation_attempts(attempts))
    }

    async fn llm_fallback(
        &self,
        llm: &Arc<dyn LlmProvider>,
        task_id: Uuid,
        req: &RetrievalRequest,
        filters_json: Value,
        limit: usize,
        offset: usize,
        attempts: Vec<ReformulationAttempt>,
    ) -> Result<Envelope, AgentFailure> {
        let prompt = req.prompt.clone().unwrap_or_else(|| filters_json.to_string());
        let context = json!({
            "table": self.table,
            "filters": filters_json,
            "reformulation_attempts": attempts.len(),
            "tools": ["query", "read", "get_columns"],
        });

        let answer = match llm.reason(&prompt, &context).await {
            Ok(v) => v,
            Err(LlmError::Transport(msg)) => return Err(AgentFailure::transient(msg)),
            Err(e) => return Ok(Envelope::error(&self.source(), task_id, e.to_string())),
        };

        let rows = rows_from_answer(answer);
        Ok(
            Envelope::from_records_raw(&self.source(), rows, task_id, req.include_raw)
                .with_filters(filters_json)
                .with_page(limit, offset)
                .with_fallback("agent")
                .with_reformulation_attempts(attempts),
        )
    }

    /// Structured extraction with bounded parse retries. Any provider
    /// failure degrades to "no filters" — the fallback path decides next.
    async fn llm_extract(
        &self,
        llm: &Arc<dyn LlmProvider>,
        prompt: &str,
    ) -> BTreeMap<String, String> {
        for attempt in 0..=LLM_PARSE_RETRIES {
            match llm.extract_filters(prompt).await {
                Ok(Value::Object(map)) => {
                    let mut out = BTreeMap::new();
                    for (k, v) in map {
                        let key = k.to_ascii_lowercase();
                        if FILTER_KEYS.contains(&key.as_str()) && !v.is_null() {
                            out.insert(key, scalar_string(&v));
                        }
                    }
                    return out;
                }
                Ok(other) => {
                    debug!(attempt, %other, "llm extraction returned non-object; retrying");
                }
                Err(LlmError::Decode(msg)) => {
                    debug!(attempt, msg = msg.as_str(), "llm extraction decode failure; retrying");
                }
                Err(e) => {
                    debug!(error = %e, "llm extraction unavailable");
                    return BTreeMap::new();
                }
            }
        }
        BTreeMap::new()
    }
}

#[async_trait]
impl TaskAgent for RetrievalAgent {
    fn name(&self) -> &'static str {
        "rag"
    }

    fn domain(&self) -> &'static str {
        "rag"
    }

    async fn handle(&self, task: &Task) -> Result<Envelope, AgentFailure> {
        let request: RetrievalRequest = match serde_json::from_value(task.payload.clone()) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Envelope::error(
                    &self.source(),
                    task.task_id,
                    format!("ValidationError: bad retrieval payload: {e}"),
                ))
            }
        };
        self.retrieve(task.task_id, request).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Translate canonical string filters into the DSL, negotiating `ilike`.
/// `company` (and any value carrying wildcards) becomes containment when
/// the adapter supports it; otherwise a plain equality on the bare value.
fn to_dsl(filters: &BTreeMap<String, String>, ilike: bool) -> Vec<Filter> {
    filters
        .iter()
        .map(|(k, v)| {
            let has_wildcard = v.contains('%') || v.contains('*');
            let containment = has_wildcard || k == "company";
            if containment && ilike {
                let pattern = if has_wildcard {
                    v.clone()
                } else {
                    format!("%{v}%")
                };
                Filter::ilike(k.clone(), pattern)
            } else {
                let bare: String = v.chars().filter(|c| *c != '%' && *c != '*').collect();
                Filter::eq(k.clone(), bare)
            }
        })
        .collect()
}

/// Group counts by `company` column for the summary block.
fn summarize(records: &[weft_envelope::Record]) -> Value {
    let mut by_company: BTreeMap<String, usize> = BTreeMap::new();
    for rec in records {
        let key = rec
            .columns
            .get("company")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        *by_company.entry(key).or_default() += 1;
    }
    json!({ "by_company": by_company })
}

/// Shape the reasoning reply into rows: an array of objects verbatim,
/// anything else as a single `answer` record.
fn rows_from_answer(answer: Value) -> Vec<Row> {
    match answer {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(m) => m,
                other => {
                    let mut m = Map::new();
                    m.insert("answer".to_string(), other);
                    m
                }
            })
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let mut m = Map::new();
            m.insert("answer".to_string(), other);
            vec![m]
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
