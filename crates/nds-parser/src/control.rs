//! Minimal status endpoint for the Parser node, for parity with the
//! Gateway's and Scanner's control surfaces.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::worker::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub started_at: std::time::Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stopping = state.pool.stop_handle().load(Ordering::SeqCst);
    Json(serde_json::json!({
        "status": if stopping { "stopping" } else { "running" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
