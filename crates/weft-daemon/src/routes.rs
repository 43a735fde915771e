//! Axum router and all HTTP handlers for weft-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. Handlers are `pub(crate)` so in-process
//! tests can compose the bare router.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use weft_registry::IngressError;
use weft_stream::Keyspace;

use crate::{
    api_types::{
        DomainStatus, ErrorResponse, HealthResponse, IngestRequest, IngestResponse,
        StatusResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

/// Cap on `wait_ms` so a caller cannot park a handler forever.
const MAX_WAIT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/ingest", post(ingest))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut domains = Vec::new();
    for domain in st.registry.domains() {
        let tasks_stream = st.keyspace.tasks(domain);
        let group = Keyspace::workers_group(domain);
        let stats = st
            .store
            .pending(&tasks_stream, &group)
            .await
            .unwrap_or_default();
        domains.push(DomainStatus {
            domain: domain.to_string(),
            tasks_stream,
            pending: stats.count,
            consumers: stats.consumers,
        });
    }

    let snap = StatusResponse {
        daemon_uptime_secs: uptime_secs(),
        config_hash: st.config_hash.clone(),
        flows: st.registry.flows(),
        domains,
        persist_metrics: st
            .persistence
            .metrics_snapshot()
            .into_iter()
            .map(Into::into)
            .collect(),
    };
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/ingest
// ---------------------------------------------------------------------------

/// Publish a task for a registered flow. With `wait_ms`, poll the paired
/// results stream and inline the result; without it, return the id
/// immediately (202).
pub(crate) async fn ingest(
    State(st): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Response {
    let task_id = match st.ingress.ingest(&req.flow, req.payload.clone()).await {
        Ok(id) => id,
        Err(IngressError::FlowUnknown(flow)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("unknown flow '{flow}'"),
                }),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    info!(task_id = %task_id, flow = req.flow.as_str(), "ingested");
    let _ = st.bus.send(BusMsg::Ingested {
        task_id,
        flow: req.flow.clone(),
    });

    let Some(wait_ms) = req.wait_ms else {
        return (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                task_id,
                result: None,
            }),
        )
            .into_response();
    };

    let wait = Duration::from_millis(wait_ms).min(MAX_WAIT);
    let domain = st.registry.domain_of(&req.flow).unwrap_or("rag");
    match st.ingress.wait_for_result(domain, task_id, wait).await {
        Ok(Some(result)) => {
            let _ = st.bus.send(BusMsg::Result {
                task_id,
                status: result.status,
            });
            (
                StatusCode::OK,
                Json(IngestResponse {
                    task_id,
                    result: Some(result),
                }),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                task_id,
                result: None,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = st.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        let msg = msg.ok()?;
        let event = Event::default()
            .json_data(&msg)
            .expect("bus message serialization must not fail");
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
