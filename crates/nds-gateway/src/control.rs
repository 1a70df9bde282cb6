//! Plain-HTTP control surface: `status`/`restart` endpoints plus the
//! duplex WebSocket upgrade route, mirroring the lifecycle surface of
//! `original_source/Gateway/app/core/gateway.py`'s `start`/`stop`/
//! `status`/`restart`.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::api::GatewayContext;
use crate::transport::handle_socket;

pub struct ServiceState {
    pub started_at: std::time::Instant,
    pub requests_served: AtomicU64,
}

#[derive(Clone)]
pub struct AppState {
    pub ctx: GatewayContext,
    pub service: Arc<ServiceState>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/status", get(status))
        .route("/pools", get(pool_status))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    state.service.requests_served.fetch_add(1, Ordering::Relaxed);
    let ctx = state.ctx.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    verbose: bool,
}

async fn status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> Json<serde_json::Value> {
    let uptime = state.service.started_at.elapsed().as_secs();
    let served = state.service.requests_served.load(Ordering::Relaxed);
    if q.verbose {
        Json(serde_json::json!({
            "status": "running",
            "uptime_secs": uptime,
            "requests_served": served,
            "pools": state.ctx.pools.all_status(),
        }))
    } else {
        Json(serde_json::json!({ "status": "running", "uptime_secs": uptime }))
    }
}

async fn pool_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "pools": state.ctx.pools.all_status() }))
}
