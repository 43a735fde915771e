//! Namespaced key construction.
//!
//! Every key the fabric touches is derived here, so the layout in §external
//! interfaces exists in exactly one place:
//!
//! ```text
//! {ns}:{domain}:tasks          task stream, group {domain}-workers
//! {ns}:{domain}:results        result stream, range-scanned by task_id
//! {ns}:{domain}:dlq            dead letters, group dlq-readers
//! {ns}:ops:hb:{service}:{id}   worker heartbeat, TTL string
//! {ns}:ops:idemp:{stream}:{id} idempotency lock, TTL string
//! ```

/// Key builder bound to one namespace prefix.
#[derive(Debug, Clone)]
pub struct Keyspace {
    ns: String,
}

impl Keyspace {
    pub fn new(ns: impl Into<String>) -> Self {
        Self { ns: ns.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn tasks(&self, domain: &str) -> String {
        format!("{}:{domain}:tasks", self.ns)
    }

    pub fn results(&self, domain: &str) -> String {
        format!("{}:{domain}:results", self.ns)
    }

    pub fn dlq(&self, domain: &str) -> String {
        format!("{}:{domain}:dlq", self.ns)
    }

    /// Group name consuming a domain's task stream.
    pub fn workers_group(domain: &str) -> String {
        format!("{domain}-workers")
    }

    /// Group name external consumers use to drain a DLQ stream.
    pub fn dlq_readers_group() -> &'static str {
        "dlq-readers"
    }

    pub fn heartbeat(&self, service: &str, id: &str) -> String {
        format!("{}:ops:hb:{service}:{id}", self.ns)
    }

    pub fn idempotency(&self, stream: &str, msg_id: &str) -> String {
        format!("{}:ops:idemp:{stream}:{msg_id}", self.ns)
    }
}
