//! The worker runtime: consumer-group claim loop and task settlement.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use weft_envelope::{data_field, Task, TaskResult, DATA_FIELD};
use weft_monitor::Monitor;
use weft_registry::AgentRegistry;
use weft_stream::{Keyspace, StreamEntry, StreamError, StreamStore};

use crate::dispatcher::Dispatcher;
use crate::lifecycle::{TaskEvent, TaskLifecycle};

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// Runtime knobs for one domain worker, assembled from the process
/// [`weft_config::Config`] plus a unique consumer identity.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub domain: String,
    /// Heartbeat service label (`{ns}:ops:hb:{service}:{consumer}`).
    pub service: String,
    /// Unique consumer name within the group.
    pub consumer: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub stream_maxlen: Option<usize>,
    pub enable_dlq: bool,
    /// Entries fetched per claim call.
    pub claim_count: usize,
    /// Claim block timeout; also bounds shutdown latency.
    pub claim_block: Duration,
    pub hb_enabled: bool,
    pub hb_interval: Duration,
    pub hb_ttl: Duration,
    pub idemp_ttl: Duration,
    /// How long in-flight tasks may finish after shutdown; afterwards they
    /// are abandoned un-acked for redelivery.
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    pub fn for_domain(cfg: &weft_config::Config, domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            service: "worker".to_string(),
            consumer: format!("{domain}-{}", Uuid::new_v4()),
            max_retries: cfg.stream.max_retries,
            retry_backoff: Duration::from_millis(cfg.stream.retry_backoff_ms),
            stream_maxlen: cfg.stream.stream_maxlen,
            enable_dlq: cfg.stream.enable_dlq,
            claim_count: 8,
            claim_block: Duration::from_millis(500),
            hb_enabled: cfg.ops.hb_enabled,
            hb_interval: Duration::from_secs(cfg.ops.hb_interval_secs),
            hb_ttl: Duration::from_secs(cfg.ops.hb_ttl_secs),
            idemp_ttl: Duration::from_secs(cfg.ops.idemp_ttl_secs),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Shutdown token
// ---------------------------------------------------------------------------

/// Cooperative shutdown: the claim loop re-checks the flag each turn, so the
/// worst-case exit latency is one `claim_block`.
pub fn shutdown_channel() -> (ShutdownHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, rx)
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    Stream(StreamError),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Stream(e) => write!(f, "worker stream error: {e}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<StreamError> for WorkerError {
    fn from(e: StreamError) -> Self {
        WorkerError::Stream(e)
    }
}

// ---------------------------------------------------------------------------
// WorkerRuntime
// ---------------------------------------------------------------------------

/// One worker for one domain. Cheap to clone; clones share the store,
/// registry, dispatcher and monitor, which is how claimed entries are
/// settled on spawned tasks.
#[derive(Clone)]
pub struct WorkerRuntime {
    store: Arc<dyn StreamStore>,
    registry: AgentRegistry,
    dispatcher: Arc<Dispatcher>,
    monitor: Monitor,
    keyspace: Keyspace,
    cfg: Arc<WorkerConfig>,
    shutdown: watch::Receiver<bool>,
}

impl WorkerRuntime {
    pub fn new(
        store: Arc<dyn StreamStore>,
        registry: AgentRegistry,
        dispatcher: Arc<Dispatcher>,
        monitor: Monitor,
        keyspace: Keyspace,
        cfg: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            monitor,
            keyspace,
            cfg: Arc::new(cfg),
            shutdown,
        }
    }

    fn tasks_stream(&self) -> String {
        self.keyspace.tasks(&self.cfg.domain)
    }

    fn group(&self) -> String {
        Keyspace::workers_group(&self.cfg.domain)
    }

    /// Run until shutdown. Creates the consumer group (cursor `"$"`) and the
    /// heartbeat task, then claims and settles entries until the stop flag
    /// is set.
    pub async fn run(self) -> Result<(), WorkerError> {
        let tasks_stream = self.tasks_stream();
        let group = self.group();
        self.store.create_group(&tasks_stream, &group, "$").await?;

        let hb = self.cfg.hb_enabled.then(|| {
            spawn_heartbeat(
                Arc::clone(&self.store),
                self.keyspace
                    .heartbeat(&self.cfg.service, &self.cfg.consumer),
                self.cfg.hb_interval,
                self.cfg.hb_ttl,
                self.shutdown.clone(),
            )
        });

        info!(
            domain = self.cfg.domain.as_str(),
            consumer = self.cfg.consumer.as_str(),
            "worker started"
        );

        let mut inflight: JoinSet<()> = JoinSet::new();
        while !*self.shutdown.borrow() {
            let claimed = self
                .store
                .claim(
                    &tasks_stream,
                    &group,
                    &self.cfg.consumer,
                    self.cfg.claim_count,
                    self.cfg.claim_block,
                )
                .await;

            let entries = match claimed {
                Ok(entries) => entries,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "claim failed; backing off");
                    tokio::time::sleep(self.cfg.claim_block).await;
                    continue;
                }
                Err(e) => {
                    if let Some(hb) = &hb {
                        hb.abort();
                    }
                    return Err(e.into());
                }
            };

            for entry in entries {
                let rt = self.clone();
                inflight.spawn(async move { rt.process_entry(entry).await });
            }

            // Reap finished settlements without blocking the claim loop.
            while inflight.try_join_next().is_some() {}
        }

        // Bounded grace for in-flight tasks; anything still running is
        // abandoned un-acked so the group redelivers it elsewhere.
        let deadline = tokio::time::Instant::now() + self.cfg.shutdown_grace;
        while !inflight.is_empty() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                inflight.abort_all();
                break;
            }
            match tokio::time::timeout(deadline - now, inflight.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    inflight.abort_all();
                    break;
                }
            }
        }

        if let Some(hb) = hb {
            hb.abort();
        }
        info!(consumer = self.cfg.consumer.as_str(), "worker stopped");
        Ok(())
    }

    /// Settle one claimed entry through the lifecycle state machine.
    ///
    /// Public so harnesses can drive deliveries (including duplicate
    /// deliveries of the same `msg_id`) without a claim loop.
    pub async fn process_entry(&self, entry: StreamEntry) {
        let tasks_stream = self.tasks_stream();
        let group = self.group();
        let mut lc = TaskLifecycle::claimed(entry.id.clone());

        // Idempotency lock: this delivery owns the side effects, or a
        // previous one already did.
        let lock_key = self.keyspace.idempotency(&tasks_stream, &entry.id);
        let acquired = match self.store.lock_acquire(&lock_key, self.cfg.idemp_ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Leave un-acked: the group will redeliver.
                warn!(error = %e, msg_id = entry.id.as_str(), "lock acquire failed");
                return;
            }
        };
        if !acquired {
            advance(&mut lc, TaskEvent::AlreadyLocked);
            self.monitor
                .emit("worker", "duplicate_delivery", json!({ "msg_id": entry.id }));
            self.ack(&tasks_stream, &group, &entry.id).await;
            return;
        }
        advance(&mut lc, TaskEvent::Lock);

        let decoded = data_field(&entry.fields)
            .map_err(|e| e.to_string())
            .and_then(|data| Task::from_data(data).map_err(|e| e.to_string()));
        let task = match decoded {
            Ok(task) => task,
            Err(reason) => {
                advance(&mut lc, TaskEvent::DeadLetter);
                self.dead_letter_fields(&entry.fields, &format!("ValidationError: {reason}"))
                    .await;
                self.ack(&tasks_stream, &group, &entry.id).await;
                return;
            }
        };

        self.monitor.emit(
            "worker",
            "task_claimed",
            json!({ "msg_id": entry.id, "task_id": task.task_id, "flow": task.flow, "attempt": task.meta.attempt }),
        );

        let Some(agent) = self.registry.resolve(&task.flow) else {
            advance(&mut lc, TaskEvent::DeadLetter);
            self.settle_terminal(
                &entry,
                &task,
                &format!("FlowUnknown: no agent registered for flow '{}'", task.flow),
                None,
            )
            .await;
            return;
        };

        advance(&mut lc, TaskEvent::Start);
        let agent_name = agent.name();
        let task_for_agent = task.clone();
        let outcome = self
            .dispatcher
            .submit(agent_name, async move {
                AssertUnwindSafe(agent.handle(&task_for_agent))
                    .catch_unwind()
                    .await
            })
            .await;

        match outcome {
            Ok(Ok(envelope)) => {
                if envelope.status == weft_envelope::EnvelopeStatus::Error {
                    // In-domain terminal failure: error result + DLQ, no retry.
                    advance(&mut lc, TaskEvent::DeadLetter);
                    let reason = envelope
                        .error
                        .clone()
                        .unwrap_or_else(|| "agent error".to_string());
                    self.settle_terminal(&entry, &task, &reason, Some(envelope))
                        .await;
                } else {
                    advance(&mut lc, TaskEvent::Succeed);
                    self.settle_success(&entry, &task, envelope).await;
                }
            }
            Ok(Err(failure)) => {
                if failure.transient && task.meta.attempt < self.cfg.max_retries {
                    advance(&mut lc, TaskEvent::Retry);
                    self.settle_retry(&entry, &task, &failure.message).await;
                } else {
                    advance(&mut lc, TaskEvent::DeadLetter);
                    self.settle_terminal(&entry, &task, &failure.message, None)
                        .await;
                }
            }
            Err(panic) => {
                let message = panic_message(panic);
                self.monitor.emit(
                    "worker",
                    "agent_panic",
                    json!({ "task_id": task.task_id, "flow": task.flow, "message": message }),
                );
                // Programmer errors get exactly one retry, then the DLQ.
                if task.meta.attempt < self.cfg.max_retries.min(1) {
                    advance(&mut lc, TaskEvent::Retry);
                    self.settle_retry(&entry, &task, &message).await;
                } else {
                    advance(&mut lc, TaskEvent::DeadLetter);
                    self.settle_terminal(&entry, &task, &format!("panic: {message}"), None)
                        .await;
                }
            }
        }
    }

    // -- settlement ---------------------------------------------------------

    /// Publish the result envelope, then ack. Publish happens-before ack.
    async fn settle_success(&self, entry: &StreamEntry, task: &Task, envelope: weft_envelope::Envelope) {
        let result = TaskResult::from_envelope(task.task_id, envelope);
        if !self.publish_result(&result).await {
            return; // not acked; redelivery after lock expiry re-publishes
        }
        self.ack(&self.tasks_stream(), &self.group(), &entry.id).await;
        self.monitor.emit(
            "worker",
            "task_acked",
            json!({ "task_id": task.task_id, "flow": task.flow, "status": result.status }),
        );
    }

    /// Re-publish with `attempt + 1` after the fixed backoff, then ack the
    /// original delivery.
    async fn settle_retry(&self, entry: &StreamEntry, task: &Task, reason: &str) {
        if !self.cfg.retry_backoff.is_zero() {
            tokio::time::sleep(self.cfg.retry_backoff).await;
        }
        let retry = task.next_attempt();
        let publish = self
            .store
            .publish(
                &self.tasks_stream(),
                vec![(DATA_FIELD.to_string(), retry.to_data())],
                self.cfg.stream_maxlen,
            )
            .await;
        if let Err(e) = publish {
            warn!(error = %e, task_id = %task.task_id, "retry publish failed");
            return;
        }
        self.ack(&self.tasks_stream(), &self.group(), &entry.id).await;
        self.monitor.emit(
            "worker",
            "task_retried",
            json!({ "task_id": task.task_id, "flow": task.flow, "attempt": retry.meta.attempt, "reason": reason }),
        );
    }

    /// Publish an error result (the agent's envelope when there is one),
    /// dead-letter the task, ack the original.
    async fn settle_terminal(
        &self,
        entry: &StreamEntry,
        task: &Task,
        reason: &str,
        envelope: Option<weft_envelope::Envelope>,
    ) {
        let result = match envelope {
            Some(env) => TaskResult::from_envelope(task.task_id, env),
            None => TaskResult::failure(task.task_id, reason),
        };
        if !self.publish_result(&result).await {
            return;
        }
        self.dead_letter_fields(
            &[(DATA_FIELD.to_string(), task.to_data())],
            reason,
        )
        .await;
        self.ack(&self.tasks_stream(), &self.group(), &entry.id).await;
        self.monitor.emit(
            "worker",
            "task_dead_lettered",
            json!({ "task_id": task.task_id, "flow": task.flow, "reason": reason }),
        );
    }

    async fn publish_result(&self, result: &TaskResult) -> bool {
        let publish = self
            .store
            .publish(
                &self.keyspace.results(&self.cfg.domain),
                vec![(DATA_FIELD.to_string(), result.to_data())],
                self.cfg.stream_maxlen,
            )
            .await;
        match publish {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, task_id = %result.task_id, "result publish failed");
                false
            }
        }
    }

    async fn dead_letter_fields(&self, fields: &[(String, String)], reason: &str) {
        if !self.cfg.enable_dlq {
            return;
        }
        let mut dlq_fields: Vec<(String, String)> = fields.to_vec();
        dlq_fields.push(("reason".to_string(), reason.to_string()));
        if let Err(e) = self
            .store
            .publish(
                &self.keyspace.dlq(&self.cfg.domain),
                dlq_fields,
                self.cfg.stream_maxlen,
            )
            .await
        {
            warn!(error = %e, "dlq publish failed");
        }
    }

    async fn ack(&self, stream: &str, group: &str, msg_id: &str) {
        if let Err(e) = self.store.ack(stream, group, msg_id).await {
            warn!(error = %e, msg_id, "ack failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn advance(lc: &mut TaskLifecycle, event: TaskEvent) {
    if let Err(e) = lc.apply(event) {
        // Indicates a runtime bug; loudly visible, never silently ignored.
        error!(error = %e, msg_id = lc.msg_id.as_str(), "task lifecycle violation");
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Background task refreshing `{ns}:ops:hb:{service}:{id}` every `interval`
/// with TTL `ttl`, until the shutdown flag flips.
fn spawn_heartbeat(
    store: Arc<dyn StreamStore>,
    key: String,
    interval: Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.heartbeat(&key, ttl).await {
                        warn!(error = %e, key = key.as_str(), "heartbeat failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
