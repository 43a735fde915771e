//! Redis-backed stream store.
//!
//! One auto-reconnecting [`ConnectionManager`] serves all callers; commands
//! are issued explicitly (`XADD`, `XGROUP CREATE`, `XREADGROUP`, `XACK`,
//! `XPENDING`, `XRANGE`, `SET NX EX`) and responses are decoded defensively
//! — a malformed entry is skipped, never a panic.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Value};

use crate::error::StreamError;
use crate::store::{PendingStats, StreamEntry, StreamStore};

/// Poll cadence for `claim` (see the method's blocking note).
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// [`StreamStore`] over a Redis server.
#[derive(Clone)]
pub struct RedisStreams {
    conn: ConnectionManager,
}

impl RedisStreams {
    /// Connect with automatic reconnection.
    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        Ok(Self { conn })
    }
}

fn map_err(e: redis::RedisError) -> StreamError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
    {
        StreamError::Connection(e.to_string())
    } else {
        StreamError::Protocol(e.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

fn as_array(v: &Value) -> Option<&[Value]> {
    match v {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn as_string(v: &Value) -> Option<String> {
    match v {
        Value::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Int(n) => u64::try_from(*n).ok(),
        other => as_string(other).and_then(|s| s.parse().ok()),
    }
}

/// Decode one `[id, [k, v, k, v, ...]]` entry pair.
fn decode_entry(v: &Value) -> Option<StreamEntry> {
    let pair = as_array(v)?;
    let id = as_string(pair.first()?)?;
    let kv = as_array(pair.get(1)?)?;
    let mut fields = Vec::with_capacity(kv.len() / 2);
    for chunk in kv.chunks(2) {
        if let (Some(k), Some(val)) = (chunk.first().and_then(as_string), chunk.get(1).and_then(as_string)) {
            fields.push((k, val));
        }
    }
    Some(StreamEntry { id, fields })
}

/// Decode an `XRANGE`-shaped reply: `[[id, fields], ...]`.
fn decode_entries(v: &Value) -> Vec<StreamEntry> {
    as_array(v)
        .map(|items| items.iter().filter_map(decode_entry).collect())
        .unwrap_or_default()
}

/// Decode an `XREADGROUP` reply: `[[stream, [[id, fields], ...]], ...]`.
fn decode_read_reply(v: &Value) -> Vec<StreamEntry> {
    let mut out = Vec::new();
    if let Some(streams) = as_array(v) {
        for s in streams {
            if let Some(pair) = as_array(s) {
                if let Some(entries) = pair.get(1) {
                    out.extend(decode_entries(entries));
                }
            }
        }
    }
    out
}

/// Decode an `XPENDING` summary reply:
/// `[count, min_id, max_id, [[consumer, count], ...]]`.
fn decode_pending(v: &Value) -> PendingStats {
    let Some(parts) = as_array(v) else {
        return PendingStats::default();
    };
    let count = parts.first().and_then(as_u64).unwrap_or(0);
    let min_id = parts.get(1).and_then(as_string);
    let max_id = parts.get(2).and_then(as_string);
    let consumers = parts
        .get(3)
        .and_then(as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| {
                    let pair = as_array(c)?;
                    Some((as_string(pair.first()?)?, as_u64(pair.get(1)?)?))
                })
                .collect()
        })
        .unwrap_or_default();
    PendingStats {
        count,
        min_id,
        max_id,
        consumers,
    }
}

// ---------------------------------------------------------------------------
// StreamStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl StreamStore for RedisStreams {
    async fn publish(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
        maxlen: Option<usize>,
    ) -> Result<String, StreamError> {
        let mut c = cmd("XADD");
        c.arg(stream);
        if let Some(maxlen) = maxlen {
            c.arg("MAXLEN").arg("~").arg(maxlen);
        }
        c.arg("*");
        for (k, v) in &fields {
            c.arg(k).arg(v);
        }
        let mut conn = self.conn.clone();
        c.query_async::<String>(&mut conn).await.map_err(map_err)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
    ) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let result = cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start)
            .arg("MKSTREAM")
            .query_async::<()>(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // Existing group: creation is idempotent.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    /// Blocking-with-timeout semantics via short non-blocking polls.
    /// The shared multiplexed connection must never issue a server-side
    /// `BLOCK` — it would stall every other command on the pipe — so the
    /// wait happens client-side.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let mut conn = self.conn.clone();
            let reply = cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer)
                .arg("COUNT")
                .arg(count)
                .arg("STREAMS")
                .arg(stream)
                .arg(">")
                .query_async::<Value>(&mut conn)
                .await;
            let entries = match reply {
                Ok(Value::Nil) => Vec::new(),
                Ok(v) => decode_read_reply(&v),
                Err(e) if e.to_string().contains("NOGROUP") => {
                    return Err(StreamError::GroupMissing {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    })
                }
                Err(e) => return Err(map_err(e)),
            };
            if !entries.is_empty() {
                return Ok(entries);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(msg_id)
            .query_async::<i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingStats, StreamError> {
        let mut conn = self.conn.clone();
        let reply = cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async::<Value>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(decode_pending(&reply))
    }

    async fn read_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.conn.clone();
        let reply = cmd("XRANGE")
            .arg(stream)
            .arg(start)
            .arg(end)
            .arg("COUNT")
            .arg(count)
            .query_async::<Value>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(decode_entries(&reply))
    }

    async fn lock_acquire(&self, key: &str, ttl: Duration) -> Result<bool, StreamError> {
        let mut conn = self.conn.clone();
        let reply = cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn heartbeat(&self, key: &str, ttl: Duration) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        cmd("SET")
            .arg(key)
            .arg("1")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StreamError> {
        let mut conn = self.conn.clone();
        let n = cmd("EXISTS")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n > 0)
    }

    async fn stream_len(&self, stream: &str) -> Result<usize, StreamError> {
        let mut conn = self.conn.clone();
        let n = cmd("XLEN")
            .arg(stream)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n.max(0) as usize)
    }
}

// ---------------------------------------------------------------------------
// Decoder unit tests (no server required)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, pairs: &[(&str, &str)]) -> Value {
        let mut kv = Vec::new();
        for (k, v) in pairs {
            kv.push(bulk(k));
            kv.push(bulk(v));
        }
        Value::Array(vec![bulk(id), Value::Array(kv)])
    }

    #[test]
    fn decodes_xreadgroup_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("agentic:rag:tasks"),
            Value::Array(vec![
                entry("1-0", &[("data", "{\"a\":1}")]),
                entry("2-0", &[("data", "{\"b\":2}")]),
            ]),
        ])]);
        let entries = decode_read_reply(&reply);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].fields[0], ("data".to_string(), "{\"a\":1}".to_string()));
    }

    #[test]
    fn decodes_xrange_reply() {
        let reply = Value::Array(vec![entry("5-0", &[("data", "x")])]);
        let entries = decode_entries(&reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "5-0");
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let reply = Value::Array(vec![Value::Int(42), entry("1-0", &[("data", "x")])]);
        let entries = decode_entries(&reply);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn decodes_xpending_summary() {
        let reply = Value::Array(vec![
            Value::Int(3),
            bulk("1-0"),
            bulk("3-0"),
            Value::Array(vec![Value::Array(vec![bulk("c1"), bulk("3")])]),
        ]);
        let stats = decode_pending(&reply);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_id.as_deref(), Some("1-0"));
        assert_eq!(stats.max_id.as_deref(), Some("3-0"));
        assert_eq!(stats.consumers, vec![("c1".to_string(), 3)]);
    }

    #[test]
    fn empty_pending_decodes_to_defaults() {
        let stats = decode_pending(&Value::Nil);
        assert_eq!(stats.count, 0);
        assert!(stats.consumers.is_empty());
    }
}
