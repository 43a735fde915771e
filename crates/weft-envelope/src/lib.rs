//! Canonical boundary values for the work fabric.
//!
//! Every component edge in the system exchanges one of three values defined
//! here: a [`Task`] (what to do), a [`TaskResult`] (what happened), or an
//! [`Envelope`] (the data itself, with per-record provenance). Keeping them
//! in one leaf crate means no other crate needs to agree on anything except
//! this one.
//!
//! Hashing lives here too: provenance row hashes, cache keys and config
//! hashes all go through the same canonical-JSON + SHA-256 path, so equal
//! content always produces equal identifiers.

pub mod envelope;
pub mod hashing;
pub mod task;

pub use envelope::{
    Envelope, EnvelopeError, EnvelopeStatus, Metadata, Provenance, Record, ReformulationAttempt,
};
pub use hashing::{canonical_json, hash_str, hash_value};
pub use task::{data_field, Task, TaskMeta, TaskResult, WireError, DATA_FIELD};
