//! Durable stream store behind one trait.
//!
//! The fabric's queues are append-only streams with consumer groups: every
//! entry is delivered to at most one consumer per group at a time, pending
//! entries survive consumer crashes, and acknowledged entries are done.
//! [`StreamStore`] captures exactly the operations the worker runtime and
//! ingress need; [`MemoryStreams`] implements them in-process for tests and
//! single-node runs, [`RedisStreams`] against a Redis server for real
//! deployments.
//!
//! Key naming is the caller's job via [`Keyspace`]; the store treats keys as
//! opaque.

pub mod error;
pub mod keyspace;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::StreamError;
pub use keyspace::Keyspace;
pub use memory::MemoryStreams;
pub use redis_store::RedisStreams;
pub use store::{PendingStats, StreamEntry, StreamStore};
