//! Startup wiring: config → backends → agents → registry → workers.
//!
//! Everything is constructed exactly once, here, and handed to the router
//! state and worker runtimes. Components receive their dependencies by
//! value; nothing re-reads the environment after this point.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use weft_agents::{LlmProvider, RetrievalAgent, WriteAgent};
use weft_config::Config;
use weft_monitor::Monitor;
use weft_persist::{
    MemoryAdapter, PersistenceAdapter, PersistenceService, ReadOnlyFacade, RestAdapter,
};
use weft_registry::{Ingress, RegistryBuilder};
use weft_stream::{Keyspace, MemoryStreams, RedisStreams, StreamStore};
use weft_worker::{
    shutdown_channel, Dispatcher, ShutdownHandle, WorkerConfig, WorkerError, WorkerRuntime,
};

use crate::state::AppState;

/// Default permit bound per agent; missing entries run unbounded.
const DEFAULT_AGENT_PERMITS: usize = 4;

/// A booted fabric: shared handler state, the shutdown token, and the
/// running worker tasks.
pub struct Fabric {
    pub state: Arc<AppState>,
    pub shutdown: ShutdownHandle,
    pub workers: Vec<tokio::task::JoinHandle<Result<(), WorkerError>>>,
}

/// Select the stream store from the configured URL. The `memory://` scheme
/// keeps everything in-process (tests, single-node demos); anything else is
/// treated as a Redis URL.
pub async fn connect_store(cfg: &Config) -> Result<Arc<dyn StreamStore>> {
    if cfg.stream.url.starts_with("memory") {
        Ok(Arc::new(MemoryStreams::new()))
    } else {
        let store = RedisStreams::connect(&cfg.stream.url)
            .await
            .with_context(|| format!("connect stream store at {}", cfg.stream.url))?;
        Ok(Arc::new(store))
    }
}

/// Build the persistence adapter from config.
pub fn build_adapter(cfg: &Config) -> Result<Arc<dyn PersistenceAdapter>> {
    match cfg.persist.backend.as_str() {
        "rest" => {
            let url = cfg
                .persist
                .rest_url
                .clone()
                .context("rest backend requires PERSIST_REST_URL")?;
            Ok(Arc::new(RestAdapter::new(
                url,
                cfg.persist.rest_api_key.clone(),
            )))
        }
        _ => Ok(Arc::new(MemoryAdapter::new())),
    }
}

/// Wire the whole fabric and start one worker per registered domain.
pub async fn bootstrap(
    cfg: &Config,
    store: Arc<dyn StreamStore>,
    llm: Option<Arc<dyn LlmProvider>>,
) -> Result<Fabric> {
    let monitor = Monitor::new();
    let keyspace = Keyspace::new(cfg.stream.namespace.clone());

    let adapter = build_adapter(cfg)?;
    let service = PersistenceService::new(
        adapter,
        cfg.persist.read_tables.clone(),
        cfg.persist.write_tables.clone(),
        monitor.clone(),
    );
    let facade = ReadOnlyFacade::over(&service);

    let retrieval = Arc::new(RetrievalAgent::new(facade, cfg.rag.clone(), llm));
    let writer = Arc::new(WriteAgent::new(service.clone()));

    let registry = RegistryBuilder::new()
        .register("rag.retrieve", retrieval)?
        .register("persist.write", writer)?
        .build();

    let ingress = Ingress::new(
        Arc::clone(&store),
        registry.clone(),
        keyspace.clone(),
        cfg.stream.stream_maxlen,
    );

    let mut limits = HashMap::new();
    limits.insert("rag".to_string(), DEFAULT_AGENT_PERMITS);
    limits.insert("persist".to_string(), DEFAULT_AGENT_PERMITS);
    let dispatcher = Arc::new(Dispatcher::new(limits));

    let (shutdown, rx) = shutdown_channel();
    let mut workers = Vec::new();
    for domain in registry.domains() {
        // Group exists before the first ingest can land; the worker's own
        // ensure call is an idempotent no-op after this.
        store
            .create_group(&keyspace.tasks(domain), &Keyspace::workers_group(domain), "$")
            .await
            .with_context(|| format!("create consumer group for domain {domain}"))?;
        let runtime = WorkerRuntime::new(
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&dispatcher),
            monitor.clone(),
            keyspace.clone(),
            WorkerConfig::for_domain(cfg, domain),
            rx.clone(),
        );
        workers.push(tokio::spawn(runtime.run()));
    }

    let state = Arc::new(AppState::new(
        ingress,
        registry,
        store,
        service,
        keyspace,
        cfg.config_hash(),
    ));

    Ok(Fabric {
        state,
        shutdown,
        workers,
    })
}
