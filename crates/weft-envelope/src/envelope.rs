//! Result envelope: metadata + records + per-record provenance.
//!
//! # Invariants
//!
//! 1. Every record carries a provenance block with a stable row hash
//!    (canonical-JSON SHA-256 of the column map).
//! 2. `metadata.total_count == records.len()` unless a `summary` block marks
//!    the envelope as truncated, in which case `total_count` is the
//!    pre-truncation count.
//! 3. An envelope is immutable once returned by an agent; the builder
//!    methods consume `self` and are only used during assembly.
//!
//! [`Envelope::validate`] re-checks all of the above, including re-deriving
//! each row hash, so a tampered or hand-built envelope is detectable at any
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::hashing::hash_value;

// ---------------------------------------------------------------------------
// EnvelopeStatus
// ---------------------------------------------------------------------------

/// Terminal status of an envelope. There is no in-progress state; an
/// envelope only exists once the producing agent has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

// ---------------------------------------------------------------------------
// ReformulationAttempt
// ---------------------------------------------------------------------------

/// One recorded relaxation of the filter set after an empty retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReformulationAttempt {
    /// Strategy name, e.g. `"drop_email"`.
    pub reason: String,
    /// The filter set that was tried, as JSON.
    pub filters: Value,
    /// Number of rows the relaxed query returned.
    pub result_count: usize,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Envelope metadata. Optional fields are omitted from the wire form when
/// unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Producing component, e.g. `"persistence.leads"`.
    pub source: String,
    pub task_id: Uuid,
    /// UTC timestamp of retrieval (ISO-8601 on the wire).
    pub retrieved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_filters: Option<Value>,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// `"hit"` | `"miss"` when a cache was consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    /// `"agent"` | `"reformulation"` | `"suppressed"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    /// Aggregate block attached when the result set was truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reformulation_attempts: Option<Vec<ReformulationAttempt>>,
}

// ---------------------------------------------------------------------------
// Provenance / Record
// ---------------------------------------------------------------------------

/// Per-record audit block: where a row came from and a stable content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub row_id: String,
    /// Canonical-JSON SHA-256 of the column map.
    pub row_hash: String,
    pub retrieved_at: DateTime<Utc>,
    /// Verbatim source row; populated only on request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_row: Option<Value>,
}

/// One result row: an arbitrary column map plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub columns: Map<String, Value>,
    pub provenance: Provenance,
}

impl Record {
    /// Build a record from a raw column map, deriving provenance.
    ///
    /// `row_id` is taken from an `id` column when present, otherwise derived
    /// from the row hash so it stays stable for identical content.
    pub fn from_row(
        source: &str,
        row: Map<String, Value>,
        retrieved_at: DateTime<Utc>,
        include_raw: bool,
    ) -> Self {
        let as_value = Value::Object(row.clone());
        let row_hash = hash_value(&as_value);
        let row_id = match row.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => row_hash[..16].to_string(),
        };
        let raw_row = include_raw.then(|| as_value);

        Self {
            columns: row,
            provenance: Provenance {
                source: source.to_string(),
                row_id,
                row_hash,
                retrieved_at,
                raw_row,
            },
        }
    }

    /// The column map as a plain JSON object, provenance removed.
    pub fn strip_provenance(&self) -> Value {
        Value::Object(self.columns.clone())
    }
}

// ---------------------------------------------------------------------------
// EnvelopeError
// ---------------------------------------------------------------------------

/// Validation failures detectable on a fully-typed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `metadata.source` is empty.
    MissingSource,
    /// A record's provenance block is incomplete.
    MissingProvenance { index: usize },
    /// `total_count` disagrees with `records.len()` and no summary block
    /// explains the truncation.
    CountMismatch { total_count: usize, records: usize },
    /// A record's stored hash does not match its recomputed content hash.
    HashMismatch { row_id: String },
    /// `status == ERROR` but no error message is present.
    MissingErrorMessage,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::MissingSource => write!(f, "envelope metadata.source is empty"),
            EnvelopeError::MissingProvenance { index } => {
                write!(f, "record {index} has incomplete provenance")
            }
            EnvelopeError::CountMismatch {
                total_count,
                records,
            } => write!(
                f,
                "total_count={total_count} disagrees with {records} records and no summary block"
            ),
            EnvelopeError::HashMismatch { row_id } => {
                write!(f, "row {row_id}: stored hash does not match content")
            }
            EnvelopeError::MissingErrorMessage => {
                write!(f, "status=ERROR but no error message present")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The canonical boundary value: metadata + records + status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub metadata: Metadata,
    pub records: Vec<Record>,
    pub status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Assemble a success envelope from raw rows, deriving provenance for
    /// each. `total_count` starts as `rows.len()`; truncation adjusts it via
    /// [`Envelope::with_summary`].
    pub fn from_records(source: &str, rows: Vec<Map<String, Value>>, task_id: Uuid) -> Self {
        Self::from_records_raw(source, rows, task_id, false)
    }

    /// As [`Envelope::from_records`], optionally embedding the verbatim row
    /// in each provenance block.
    pub fn from_records_raw(
        source: &str,
        rows: Vec<Map<String, Value>>,
        task_id: Uuid,
        include_raw: bool,
    ) -> Self {
        let retrieved_at = Utc::now();
        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_row(source, row, retrieved_at, include_raw))
            .collect();

        Self {
            metadata: Metadata {
                source: source.to_string(),
                task_id,
                retrieved_at,
                query_filters: None,
                total_count: records.len(),
                limit: None,
                offset: None,
                cache: None,
                fallback: None,
                truncated: None,
                summary: None,
                reformulation_attempts: None,
            },
            records,
            status: EnvelopeStatus::Success,
            error: None,
        }
    }

    /// Assemble an error envelope. Carries zero records.
    pub fn error(source: &str, task_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            metadata: Metadata {
                source: source.to_string(),
                task_id,
                retrieved_at: Utc::now(),
                query_filters: None,
                total_count: 0,
                limit: None,
                offset: None,
                cache: None,
                fallback: None,
                truncated: None,
                summary: None,
                reformulation_attempts: None,
            },
            records: Vec::new(),
            status: EnvelopeStatus::Error,
            error: Some(message.into()),
        }
    }

    pub fn with_filters(mut self, filters: Value) -> Self {
        self.metadata.query_filters = Some(filters);
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.metadata.limit = Some(limit);
        self.metadata.offset = Some(offset);
        self
    }

    pub fn with_cache(mut self, state: &str) -> Self {
        self.metadata.cache = Some(state.to_string());
        self
    }

    pub fn with_fallback(mut self, kind: &str) -> Self {
        self.metadata.fallback = Some(kind.to_string());
        self
    }

    pub fn with_reformulation_attempts(mut self, attempts: Vec<ReformulationAttempt>) -> Self {
        if !attempts.is_empty() {
            self.metadata.reformulation_attempts = Some(attempts);
        }
        self
    }

    /// Truncate the record set to `keep` records, attaching a summary block.
    /// `total_count` keeps the pre-truncation count.
    pub fn with_summary(mut self, summary: Value, keep: usize) -> Self {
        self.metadata.total_count = self.records.len();
        self.records.truncate(keep);
        self.metadata.truncated = Some(true);
        self.metadata.summary = Some(summary);
        self
    }

    /// Re-check every envelope invariant, including per-record content
    /// hashes. Cheap relative to the I/O that produced the envelope.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.metadata.source.is_empty() {
            return Err(EnvelopeError::MissingSource);
        }
        if self.status == EnvelopeStatus::Error && self.error.is_none() {
            return Err(EnvelopeError::MissingErrorMessage);
        }
        if self.metadata.total_count != self.records.len() && self.metadata.summary.is_none() {
            return Err(EnvelopeError::CountMismatch {
                total_count: self.metadata.total_count,
                records: self.records.len(),
            });
        }
        for (index, rec) in self.records.iter().enumerate() {
            if rec.provenance.source.is_empty() || rec.provenance.row_hash.is_empty() {
                return Err(EnvelopeError::MissingProvenance { index });
            }
            let recomputed = hash_value(&Value::Object(rec.columns.clone()));
            if recomputed != rec.provenance.row_hash {
                return Err(EnvelopeError::HashMismatch {
                    row_id: rec.provenance.row_id.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
