//! LLM provider boundary.
//!
//! This module defines **only** the provider trait and its error type.
//! No concrete provider implementations and no prompt templates belong
//! here; the retrieval agent receives an `Arc<dyn LlmProvider>` at
//! construction, and `None` means structured-only behavior.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors an [`LlmProvider`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { code: Option<i64>, message: String },
    /// A response could not be decoded as the requested JSON shape.
    Decode(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transport(msg) => write!(f, "llm transport error: {msg}"),
            LlmError::Api {
                code: Some(c),
                message,
            } => write!(f, "llm api error code={c}: {message}"),
            LlmError::Api {
                code: None,
                message,
            } => write!(f, "llm api error: {message}"),
            LlmError::Decode(msg) => write!(f, "llm decode error: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Upstream language-model contract.
///
/// Implementations must be object-safe so callers can hold an
/// `Arc<dyn LlmProvider>` without knowing the concrete type, and
/// `Send + Sync` so one instance serves concurrent dispatches.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. `"openai"`, `"mock"`).
    fn name(&self) -> &'static str;

    /// Structured extraction: parse a free-text prompt into a JSON object
    /// of filter candidates (`{"email": ..., "company": ...}`). The reply
    /// must be JSON only; callers re-prompt a bounded number of times on
    /// decode failure.
    async fn extract_filters(&self, prompt: &str) -> Result<Value, LlmError>;

    /// Reasoning fallback for queries deterministic retrieval could not
    /// answer. `context` describes the tool surface and what was already
    /// tried. The reply is JSON: an array of row objects, or any other
    /// value to be wrapped as a single answer record.
    async fn reason(&self, prompt: &str, context: &Value) -> Result<Value, LlmError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
