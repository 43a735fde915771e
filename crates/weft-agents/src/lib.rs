//! Domain agents.
//!
//! Two agents ride the fabric out of the box: the [`RetrievalAgent`]
//! (free text → filters → allowlisted read path, with caching,
//! reformulation and a rate-limited LLM fallback) and the [`WriteAgent`]
//! (insert/upsert/batch through the persistence service). Both return
//! envelopes for every in-domain outcome; only infrastructure trouble
//! surfaces to the worker runtime.
//!
//! The LLM is an interface ([`LlmProvider`]) handed in at construction;
//! absent a provider the retrieval agent is purely structured — no runtime
//! probing, no optional imports.

pub mod extract;
pub mod limiter;
pub mod llm;
pub mod reformulate;
pub mod retrieval;
pub mod write;

pub use limiter::SlidingWindow;
pub use llm::{LlmError, LlmProvider};
pub use retrieval::RetrievalAgent;
pub use write::WriteAgent;
