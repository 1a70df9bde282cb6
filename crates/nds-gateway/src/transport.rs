//! Duplex WebSocket transport (C4), server side: axum's
//! `WebSocketUpgrade` plays the role of
//! `original_source/Gateway/app/services/ws_manager.py`'s
//! `ConnectionManager` — per-connection write serialization, `start`/
//! binary-chunks/`end` file streaming, and a 30s liveness ticker that
//! disconnects after `max_failures` missed checks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use nds_core::config::DuplexConfig;
use nds_core::duplex::{chunk_bytes, ControlFrame, DuplexRequest, FrameType};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::GatewayContext;

type Sink = SplitSink<WebSocket, Message>;

/// Current unix-epoch seconds, carried as a `check` frame's `data` payload.
fn unix_epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One connected Scanner or Parser peer.
pub struct PeerConnection {
    id: String,
    sink: Arc<AsyncMutex<Sink>>,
    check_failures: Arc<AtomicU32>,
}

impl PeerConnection {
    /// Sends a JSON control frame, holding the per-connection write lock so
    /// it can't interleave with an in-progress `send_file` chunk stream.
    pub async fn send_response(&self, frame: &ControlFrame) -> bool {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_json())).await.is_ok()
    }

    /// Streams `data` as `start` / binary chunks / `end`, matching
    /// `ConnectionManager.send_file`. Holds the write lock for the whole
    /// stream so no other frame (response or another file) interleaves.
    pub async fn send_file(&self, request_id: &str, data: &[u8], cfg: &DuplexConfig) -> bool {
        let mut sink = self.sink.lock().await;
        let start = ControlFrame::file_start(request_id, data.len() as u64);
        if sink.send(Message::Text(start.to_json())).await.is_err() {
            return false;
        }
        for chunk in chunk_bytes(data, cfg.chunk_size) {
            if sink.send(Message::Binary(chunk.to_vec())).await.is_err() {
                return false;
            }
        }
        let end = ControlFrame::file_end(request_id);
        sink.send(Message::Text(end.to_json())).await.is_ok()
    }
}

pub async fn handle_socket(socket: WebSocket, ctx: GatewayContext) {
    let conn_id = Uuid::new_v4().to_string();
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(AsyncMutex::new(sink));
    let check_failures = Arc::new(AtomicU32::new(0));
    let peer = Arc::new(PeerConnection {
        id: conn_id.clone(),
        sink: sink.clone(),
        check_failures: check_failures.clone(),
    });

    info!(conn_id = %conn_id, "peer connected");

    let liveness_cfg = ctx.duplex_cfg;
    let liveness_sink = sink.clone();
    let liveness_failures = check_failures.clone();
    let liveness_conn_id = conn_id.clone();
    let liveness = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(liveness_cfg.check_interval);
        loop {
            ticker.tick().await;
            let check = ControlFrame::check(unix_epoch_seconds());
            let mut sink = liveness_sink.lock().await;
            let sent = sink.send(Message::Text(check.to_json())).await.is_ok();
            drop(sink);
            if sent {
                liveness_failures.store(0, Ordering::SeqCst);
                continue;
            }
            let failures = liveness_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= liveness_cfg.max_failures {
                warn!(conn_id = %liveness_conn_id, failures, "peer failed liveness checks, disconnecting");
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                debug!(conn_id = %conn_id, %err, "stream error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                check_failures.store(0, Ordering::SeqCst);
                handle_text_frame(&peer, &ctx, &text).await;
            }
            Message::Pong(_) => {
                check_failures.store(0, Ordering::SeqCst);
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }

    liveness.abort();
    info!(conn_id = %conn_id, "peer disconnected");
}

async fn handle_text_frame(peer: &Arc<PeerConnection>, ctx: &GatewayContext, text: &str) {
    let frame = match ControlFrame::from_json(text) {
        Ok(f) => f,
        Err(err) => {
            warn!(%err, "malformed control frame");
            let err_frame = ControlFrame::error(String::new(), 400, "Invalid JSON format");
            let _ = peer.send_response(&err_frame).await;
            return;
        }
    };
    if frame.frame_type == FrameType::Check {
        return;
    }
    let request_id = frame.request_id.clone().unwrap_or_default();
    let Some(data) = frame.data else {
        let err = ControlFrame::error(request_id, 400, "missing request data");
        let _ = peer.send_response(&err).await;
        return;
    };
    let request: DuplexRequest = match serde_json::from_value(data) {
        Ok(r) => r,
        Err(err) => {
            let err_frame = ControlFrame::error(request_id, 400, err.to_string());
            let _ = peer.send_response(&err_frame).await;
            return;
        }
    };

    match crate::api::dispatch(ctx, request).await {
        crate::api::DispatchOutcome::Json(value) => {
            let frame = ControlFrame::response(request_id, value);
            let _ = peer.send_response(&frame).await;
        }
        crate::api::DispatchOutcome::File(bytes) => {
            let _ = peer.send_file(&request_id, &bytes, &ctx.duplex_cfg).await;
        }
        crate::api::DispatchOutcome::Error(code, message) => {
            let frame = ControlFrame::error(request_id, code, message);
            let _ = peer.send_response(&frame).await;
        }
    }
}
