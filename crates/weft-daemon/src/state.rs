//! Shared runtime state for weft-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use weft_envelope::EnvelopeStatus;
use weft_persist::PersistenceService;
use weft_registry::{AgentRegistry, Ingress};
use weft_stream::{Keyspace, StreamStore};

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE
/// events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Ingested { task_id: Uuid, flow: String },
    Result { task_id: Uuid, status: EnvelopeStatus },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    /// Hash of the redacted effective config, for fleet comparison.
    pub config_hash: String,
    pub ingress: Ingress,
    pub registry: AgentRegistry,
    pub store: Arc<dyn StreamStore>,
    /// The writable service handle, used only for metrics readout here.
    pub persistence: PersistenceService,
    pub keyspace: Keyspace,
}

impl AppState {
    pub fn new(
        ingress: Ingress,
        registry: AgentRegistry,
        store: Arc<dyn StreamStore>,
        persistence: PersistenceService,
        keyspace: Keyspace,
        config_hash: String,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "weft-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
            ingress,
            registry,
            store,
            persistence,
            keyspace,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_bus_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
