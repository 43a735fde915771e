//! In-process fabric harness for end-to-end scenario tests.
//!
//! Boots the whole pipeline — memory streams, memory adapter, allowlisted
//! service, both agents, registry, ingress and one worker per domain — in
//! one process with a capturing monitor, so scenario tests under `tests/`
//! can drive real task flows without Redis or a table service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use weft_agents::{LlmProvider, RetrievalAgent, WriteAgent};
use weft_config::Config;
use weft_envelope::{data_field, TaskResult, DATA_FIELD};
use weft_monitor::{CapturedEvents, Monitor};
use weft_persist::{MemoryAdapter, PersistenceService, ReadOnlyFacade, Row};
use weft_registry::{AgentRegistry, Ingress, RegistryBuilder};
use weft_stream::{Keyspace, MemoryStreams, StreamEntry, StreamStore};
use weft_worker::{
    shutdown_channel, Dispatcher, ShutdownHandle, WorkerConfig, WorkerError, WorkerRuntime,
};

/// How long scenario tests wait for a result before declaring failure.
const RESULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a row from column pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Fully wired in-process fabric.
pub struct FabricHarness {
    pub store: Arc<MemoryStreams>,
    pub adapter: Arc<MemoryAdapter>,
    pub service: PersistenceService,
    pub registry: AgentRegistry,
    pub ingress: Ingress,
    pub keyspace: Keyspace,
    /// Monitor events emitted anywhere in the fabric, for assertions.
    pub events: CapturedEvents,
    cfg: Config,
    monitor: Monitor,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
    workers: Vec<tokio::task::JoinHandle<Result<(), WorkerError>>>,
}

impl FabricHarness {
    /// A `Config` tuned for tests: no retry backoff, no heartbeats.
    pub fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.stream.retry_backoff_ms = 0;
        cfg.ops.hb_enabled = false;
        cfg
    }

    pub async fn boot(cfg: Config) -> Self {
        Self::boot_with_llm(cfg, None).await
    }

    pub async fn boot_with_llm(cfg: Config, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let (monitor, events) = Monitor::capturing();
        let keyspace = Keyspace::new(cfg.stream.namespace.clone());
        let store = Arc::new(MemoryStreams::new());
        let adapter = Arc::new(MemoryAdapter::new());

        let service = PersistenceService::new(
            Arc::clone(&adapter) as Arc<_>,
            cfg.persist.read_tables.clone(),
            cfg.persist.write_tables.clone(),
            monitor.clone(),
        );
        let facade = ReadOnlyFacade::over(&service);

        let registry = RegistryBuilder::new()
            .register(
                "rag.retrieve",
                Arc::new(RetrievalAgent::new(facade, cfg.rag.clone(), llm)),
            )
            .expect("fresh registry")
            .register("persist.write", Arc::new(WriteAgent::new(service.clone())))
            .expect("fresh registry")
            .build();

        let ingress = Ingress::new(
            Arc::clone(&store) as Arc<dyn StreamStore>,
            registry.clone(),
            keyspace.clone(),
            cfg.stream.stream_maxlen,
        );

        let mut limits = HashMap::new();
        limits.insert("rag".to_string(), 4);
        limits.insert("persist".to_string(), 4);
        let dispatcher = Arc::new(Dispatcher::new(limits));

        let (shutdown, shutdown_rx) = shutdown_channel();
        let mut workers = Vec::new();
        for domain in registry.domains() {
            store
                .create_group(&keyspace.tasks(domain), &Keyspace::workers_group(domain), "$")
                .await
                .expect("create group");
            let runtime = WorkerRuntime::new(
                Arc::clone(&store) as Arc<dyn StreamStore>,
                registry.clone(),
                Arc::clone(&dispatcher),
                monitor.clone(),
                keyspace.clone(),
                Self::worker_config(&cfg, domain),
                shutdown_rx.clone(),
            );
            workers.push(tokio::spawn(runtime.run()));
        }

        Self {
            store,
            adapter,
            service,
            registry,
            ingress,
            keyspace,
            events,
            cfg,
            monitor,
            dispatcher,
            shutdown,
            shutdown_rx,
            workers,
        }
    }

    fn worker_config(cfg: &Config, domain: &str) -> WorkerConfig {
        let mut wc = WorkerConfig::for_domain(cfg, domain);
        wc.claim_block = Duration::from_millis(50);
        wc.shutdown_grace = Duration::from_millis(500);
        wc
    }

    /// Load rows directly into the backend (test setup bypasses the
    /// allowlist on purpose).
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        self.adapter.seed(table, rows).await;
    }

    /// Ingest a task and wait for its result.
    pub async fn ingest_and_wait(&self, flow: &str, payload: Value) -> TaskResult {
        let task_id = self
            .ingress
            .ingest(flow, payload)
            .await
            .expect("ingest must succeed");
        let domain = self.registry.domain_of(flow).expect("registered flow");
        self.ingress
            .wait_for_result(domain, task_id, RESULT_TIMEOUT)
            .await
            .expect("result stream readable")
            .expect("result within timeout")
    }

    /// All results currently on a domain's results stream for a task id.
    pub async fn results_for(&self, domain: &str, task_id: Uuid) -> Vec<TaskResult> {
        self.store
            .read_range(&self.keyspace.results(domain), "-", "+", 1000)
            .await
            .expect("read results")
            .iter()
            .filter_map(|e| TaskResult::from_data(data_field(&e.fields).ok()?).ok())
            .filter(|r| r.task_id == task_id)
            .collect()
    }

    /// Current DLQ entries for a domain.
    pub async fn dlq(&self, domain: &str) -> Vec<StreamEntry> {
        self.store
            .read_range(&self.keyspace.dlq(domain), "-", "+", 1000)
            .await
            .expect("read dlq")
    }

    /// A runtime sharing this fabric's wiring but NOT spawned — scenario
    /// tests use it to hand-deliver entries (including duplicates of the
    /// same `msg_id`, which a healthy claim loop never produces).
    pub fn detached_runtime(&self, domain: &str) -> WorkerRuntime {
        WorkerRuntime::new(
            Arc::clone(&self.store) as Arc<dyn StreamStore>,
            self.registry.clone(),
            Arc::clone(&self.dispatcher),
            self.monitor.clone(),
            self.keyspace.clone(),
            Self::worker_config(&self.cfg, domain),
            self.shutdown_rx.clone(),
        )
    }

    /// Publish a raw task entry onto a domain's task stream (bypasses the
    /// ingress so tests control the exact wire bytes). Returns the msg id.
    pub async fn publish_task_data(&self, domain: &str, data: String) -> String {
        self.store
            .publish(
                &self.keyspace.tasks(domain),
                vec![(DATA_FIELD.to_string(), data)],
                None,
            )
            .await
            .expect("publish task")
    }

    /// Stop the workers and wait for them to drain.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        for w in self.workers {
            let _ = w.await;
        }
    }
}
