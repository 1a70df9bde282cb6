//! Client half of the duplex transport (C4), grounded on
//! `original_source/Parser/app/core/server.py`'s `Gateway.read_file_with_ws`:
//! open one WebSocket per request, send a JSON request frame, and collect
//! the matching response — a `scan` or `zip_info` call never streams binary
//! chunks, so there is no `start`/`end` pairing to track here (that lives in
//! the Parser's file-fetch client).

use futures_util::{SinkExt, StreamExt};
use nds_core::duplex::{ControlFrame, DuplexRequest, FrameType};
use nds_core::error::{NdsError, NdsResult};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

pub struct GatewayClient {
    ws_url: String,
}

impl GatewayClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    pub async fn scan(&self, nds_id: &str, path: &str, filter: Option<&str>) -> NdsResult<serde_json::Value> {
        self.request(DuplexRequest::Scan {
            nds_id: nds_id.to_string(),
            path: path.to_string(),
            filter: filter.map(str::to_string),
        })
        .await
    }

    pub async fn zip_info(&self, nds_id: &str, path: &str) -> NdsResult<serde_json::Value> {
        self.request(DuplexRequest::ZipInfo {
            nds_id: nds_id.to_string(),
            path: path.to_string(),
        })
        .await
    }

    async fn request(&self, request: DuplexRequest) -> NdsResult<serde_json::Value> {
        let (mut ws, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| NdsError::connect("gateway", 0, e.to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        let data = serde_json::to_value(&request).map_err(|e| NdsError::Backend(e.to_string()))?;
        let frame = ControlFrame {
            frame_type: FrameType::Response,
            code: None,
            from_api: None,
            nds_id: None,
            message: None,
            data: Some(data),
            request_id: Some(request_id.clone()),
        };
        ws.send(Message::Text(frame.to_json()))
            .await
            .map_err(|e| NdsError::Backend(e.to_string()))?;

        while let Some(message) = ws.next().await {
            let message = message.map_err(|e| NdsError::Backend(e.to_string()))?;
            let Message::Text(text) = message else {
                continue;
            };
            let response = ControlFrame::from_json(&text).map_err(|e| NdsError::Backend(e.to_string()))?;
            if response.request_id.as_deref() != Some(request_id.as_str()) {
                continue;
            }
            return match response.frame_type {
                FrameType::Error => Err(NdsError::Protocol {
                    code: response.code.unwrap_or(500),
                    message: response.message.unwrap_or_default(),
                }),
                _ => Ok(response.data.unwrap_or(serde_json::Value::Null)),
            };
        }
        Err(NdsError::connect("gateway", 0, "connection closed before a response arrived"))
    }
}
