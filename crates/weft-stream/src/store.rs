//! The stream store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StreamError;

/// One stream entry: server-assigned id plus field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

/// Summary of a group's pending (delivered, un-acked) entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub count: u64,
    pub min_id: Option<String>,
    pub max_id: Option<String>,
    /// Per-consumer pending counts.
    pub consumers: Vec<(String, u64)>,
}

/// Durable log store with consumer groups.
///
/// Implementations must be `Send + Sync`; one instance is shared by the
/// claim loop, the heartbeat task and the ingress.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append an entry; `maxlen` requests approximate trimming to that
    /// length. Returns the server-assigned entry id.
    async fn publish(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
        maxlen: Option<usize>,
    ) -> Result<String, StreamError>;

    /// Create a consumer group at `start` (`"$"` = new entries only,
    /// `"0-0"` = from the beginning). Idempotent: an existing group is fine.
    async fn create_group(&self, stream: &str, group: &str, start: &str)
        -> Result<(), StreamError>;

    /// Claim up to `count` new entries for `consumer`, blocking up to
    /// `block`. Returns empty on timeout — never busy-loops.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Acknowledge one entry for a group.
    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> Result<(), StreamError>;

    /// Pending-entry summary for a group.
    async fn pending(&self, stream: &str, group: &str) -> Result<PendingStats, StreamError>;

    /// Range scan (`"-"`/`"+"` bounds supported), oldest first.
    async fn read_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// `SET NX` with TTL. `true` when this caller won the lock.
    async fn lock_acquire(&self, key: &str, ttl: Duration) -> Result<bool, StreamError>;

    /// Set/refresh a TTL string key (heartbeats).
    async fn heartbeat(&self, key: &str, ttl: Duration) -> Result<(), StreamError>;

    /// Whether a (non-expired) key exists.
    async fn key_exists(&self, key: &str) -> Result<bool, StreamError>;

    /// Current stream length.
    async fn stream_len(&self, stream: &str) -> Result<usize, StreamError>;
}
