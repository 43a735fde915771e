//! In-process stream store.
//!
//! Deterministic single-node implementation of [`StreamStore`]: entry ids
//! are `{seq}-0` with a per-stream counter, groups track a last-delivered
//! cursor plus a pending set, and blocking claims park on a `Notify` so
//! there is no busy-loop. TTL keys expire against `Instant`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::StreamError;
use crate::store::{PendingStats, StreamEntry, StreamStore};

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct PendingEntry {
    consumer: String,
}

struct GroupData {
    /// Highest seq handed to any consumer of this group.
    last_delivered: u64,
    /// Delivered but not yet acked, keyed by seq.
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Default)]
struct StreamData {
    entries: VecDeque<(u64, Vec<(String, String)>)>,
    next_seq: u64,
    groups: HashMap<String, GroupData>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamData>,
    /// TTL string keys (locks, heartbeats) with their expiry instant.
    keys: HashMap<String, Instant>,
}

/// In-memory [`StreamStore`].
#[derive(Default)]
pub struct MemoryStreams {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryStreams {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(
        inner: &mut Inner,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| StreamError::GroupMissing {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        let grp = data
            .groups
            .get_mut(group)
            .ok_or_else(|| StreamError::GroupMissing {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;

        let mut claimed = Vec::new();
        for (seq, fields) in data.entries.iter() {
            if *seq <= grp.last_delivered {
                continue;
            }
            claimed.push(StreamEntry {
                id: format_id(*seq),
                fields: fields.clone(),
            });
            grp.pending.insert(
                *seq,
                PendingEntry {
                    consumer: consumer.to_string(),
                },
            );
            grp.last_delivered = *seq;
            if claimed.len() == count {
                break;
            }
        }
        Ok(claimed)
    }
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

/// Parse `{seq}-{part}`, plus the `-`/`+` range sentinels.
fn parse_id(id: &str) -> Option<(u64, u64)> {
    match id {
        "-" => Some((0, 0)),
        "+" => Some((u64::MAX, u64::MAX)),
        _ => {
            let mut parts = id.splitn(2, '-');
            let seq = parts.next()?.parse().ok()?;
            let part = match parts.next() {
                Some(p) => p.parse().ok()?,
                None => 0,
            };
            Some((seq, part))
        }
    }
}

fn prune_expired(keys: &mut HashMap<String, Instant>) {
    let now = Instant::now();
    keys.retain(|_, expiry| *expiry > now);
}

// ---------------------------------------------------------------------------
// StreamStore impl
// ---------------------------------------------------------------------------

#[async_trait]
impl StreamStore for MemoryStreams {
    async fn publish(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
        maxlen: Option<usize>,
    ) -> Result<String, StreamError> {
        let id = {
            let mut inner = self.inner.lock().expect("stream state poisoned");
            let data = inner.streams.entry(stream.to_string()).or_default();
            data.next_seq += 1;
            let seq = data.next_seq;
            data.entries.push_back((seq, fields));
            if let Some(maxlen) = maxlen {
                while data.entries.len() > maxlen {
                    data.entries.pop_front();
                }
            }
            format_id(seq)
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
    ) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().expect("stream state poisoned");
        let data = inner.streams.entry(stream.to_string()).or_default();
        if data.groups.contains_key(group) {
            return Ok(());
        }
        let last_delivered = match start {
            "$" => data.next_seq,
            _ => 0,
        };
        data.groups.insert(
            group.to_string(),
            GroupData {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.inner.lock().expect("stream state poisoned");
                let claimed = Self::try_claim(&mut inner, stream, group, consumer, count)?;
                if !claimed.is_empty() {
                    return Ok(claimed);
                }
                // Register for wakeups before releasing the lock so a publish
                // racing with this claim cannot be missed.
                notified.as_mut().enable();
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, msg_id: &str) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().expect("stream state poisoned");
        if let Some(data) = inner.streams.get_mut(stream) {
            if let Some(grp) = data.groups.get_mut(group) {
                if let Some((seq, _)) = parse_id(msg_id) {
                    grp.pending.remove(&seq);
                }
            }
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingStats, StreamError> {
        let inner = self.inner.lock().expect("stream state poisoned");
        let grp = inner
            .streams
            .get(stream)
            .and_then(|d| d.groups.get(group))
            .ok_or_else(|| StreamError::GroupMissing {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;

        let mut per_consumer: BTreeMap<&str, u64> = BTreeMap::new();
        for entry in grp.pending.values() {
            *per_consumer.entry(entry.consumer.as_str()).or_default() += 1;
        }
        Ok(PendingStats {
            count: grp.pending.len() as u64,
            min_id: grp.pending.keys().next().map(|s| format_id(*s)),
            max_id: grp.pending.keys().next_back().map(|s| format_id(*s)),
            consumers: per_consumer
                .into_iter()
                .map(|(c, n)| (c.to_string(), n))
                .collect(),
        })
    }

    async fn read_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let (start, end) = match (parse_id(start), parse_id(end)) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(StreamError::Protocol(format!(
                    "bad range bounds: {start}..{end}"
                )))
            }
        };
        let inner = self.inner.lock().expect("stream state poisoned");
        let Some(data) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(data
            .entries
            .iter()
            .filter(|(seq, _)| (*seq, 0) >= start && (*seq, 0) <= end)
            .take(count)
            .map(|(seq, fields)| StreamEntry {
                id: format_id(*seq),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn lock_acquire(&self, key: &str, ttl: Duration) -> Result<bool, StreamError> {
        let mut inner = self.inner.lock().expect("stream state poisoned");
        prune_expired(&mut inner.keys);
        if inner.keys.contains_key(key) {
            return Ok(false);
        }
        inner.keys.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn heartbeat(&self, key: &str, ttl: Duration) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().expect("stream state poisoned");
        inner.keys.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> Result<bool, StreamError> {
        let mut inner = self.inner.lock().expect("stream state poisoned");
        prune_expired(&mut inner.keys);
        Ok(inner.keys.contains_key(key))
    }

    async fn stream_len(&self, stream: &str) -> Result<usize, StreamError> {
        let inner = self.inner.lock().expect("stream state poisoned");
        Ok(inner.streams.get(stream).map(|d| d.entries.len()).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
