//! # HTTP Administration API
//!
//! Builds the axum router that exposes a `bcache` peer's key/value
//! operations over HTTP. All endpoints share application state through
//! axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path         | Description                                |
//! |--------|--------------|--------------------------------------------|
//! | GET    | `/health`    | Liveness probe                             |
//! | GET    | `/keys/:key` | Fetch a key; 404 if absent/expired/deleted |
//! | PUT    | `/keys/:key` | Set a key's value and TTL                  |
//! | DELETE | `/keys/:key` | Tombstone a key                            |
//!
//! `GetWithFiller` is intentionally not exposed here — the filler is a Rust
//! closure supplied by an in-process caller, not something an HTTP client
//! can hand over the wire.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::SharedMetrics;
use crate::BcachePeer;

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The wired, running cache peer.
    pub cache: Arc<BcachePeer>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/keys/{key}", get(get_handler))
        .route("/keys/{key}", put(set_handler))
        .route("/keys/{key}", delete(delete_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body for `PUT /keys/:key`.
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub value: String,
    /// Time-to-live in seconds. `<= 0` is equivalent to `DELETE`.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    0
}

/// Response body for `GET /keys/:key`.
#[derive(Debug, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
}

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /keys/:key` — returns the value if present, visible, and not
/// expired/tombstoned; 404 otherwise.
async fn get_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let (value, present) = state.cache.get(&key);
    if present {
        state.metrics.gets_hit_total.inc();
        (StatusCode::OK, Json(Some(GetResponse { key, value }))).into_response()
    } else {
        state.metrics.gets_miss_total.inc();
        (StatusCode::NOT_FOUND, Json(None::<GetResponse>)).into_response()
    }
}

/// `PUT /keys/:key` — sets the key's value and TTL. A `ttl_seconds <= 0`
/// deletes the key instead, mirroring [`bcache::Bcache::set`]'s own rule.
async fn set_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> impl IntoResponse {
    state.cache.set(key, req.value, req.ttl_seconds).await;
    if req.ttl_seconds <= 0 {
        state.metrics.deletes_total.inc();
    } else {
        state.metrics.sets_total.inc();
    }
    StatusCode::NO_CONTENT
}

/// `DELETE /keys/:key` — tombstones the key.
async fn delete_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    state.cache.delete(key).await;
    state.metrics.deletes_total.inc();
    StatusCode::NO_CONTENT
}
