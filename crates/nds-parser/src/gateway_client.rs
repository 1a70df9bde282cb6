//! Client half of the duplex transport (C4) used by the Parser to fetch
//! file bytes, grounded on
//! `original_source/Parser/app/core/server.py`'s `Gateway.read_file_with_ws`:
//! send a `read` request, then collect binary chunks until the matching
//! `end` control frame arrives.

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

    pub async fn zip_info(&self, nds_id: &str, path: &str) -> NdsResult<serde_json::Value> {
        let (mut ws, request_id) = self
            .send_request(DuplexRequest::ZipInfo {
                nds_id: nds_id.to_string(),
                path: path.to_string(),
            })
            .await?;

        while let Some(message) = ws.next().await {
            let message = message.map_err(|e| NdsError::Backend(e.to_string()))?;
            let Message::Text(text) = message else { continue };
            let frame = ControlFrame::from_json(&text).map_err(|e| NdsError::Backend(e.to_string()))?;
            if frame.request_id.as_deref() != Some(request_id.as_str()) {
                continue;
            }
            return match frame.frame_type {
                FrameType::Error => Err(NdsError::Protocol {
                    code: frame.code.unwrap_or(500),
                    message: frame.message.unwrap_or_default(),
                }),
                _ => Ok(frame.data.unwrap_or(serde_json::Value::Null)),
            };
        }
        Err(NdsError::connect("gateway", 0, "connection closed before zip_info response"))
    }

    /// Streams a byte range, accumulating binary frames between the
    /// `start` and `end` control frames.
    pub async fn fetch_range(&self, nds_id: &str, path: &str, offset: u64, size: u64) -> NdsResult<Vec<u8>> {
        let (mut ws, request_id) = self
            .send_request(DuplexRequest::Read {
                nds_id: nds_id.to_string(),
                path: path.to_string(),
                offset,
                size: Some(size),
            })
            .await?;

        let mut buffer: Vec<u8> = Vec::with_capacity(size as usize);
        let mut started = false;
        while let Some(message) = ws.next().await {
            let message = message.map_err(|e| NdsError::Backend(e.to_string()))?;
            match message {
                Message::Text(text) => {
                    let frame = ControlFrame::from_json(&text).map_err(|e| NdsError::Backend(e.to_string()))?;
                    if frame.request_id.as_deref() != Some(request_id.as_str()) {
                        continue;
                    }
                    match frame.frame_type {
                        FrameType::Start => started = true,
                        FrameType::End => return Ok(buffer),
                        FrameType::Error => {
                            return Err(NdsError::Protocol {
                                code: frame.code.unwrap_or(500),
                                message: frame.message.unwrap_or_default(),
                            })
                        }
                        _ => {}
                    }
                }
                Message::Binary(chunk) => {
                    if started {
                        buffer.extend_from_slice(&chunk);
                    }
                }
                _ => {}
            }
        }
        Err(NdsError::connect("gateway", 0, "connection closed mid-stream"))
    }

    async fn send_request(
        &self,
        request: DuplexRequest,
    ) -> NdsResult<(
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        String,
    )> {
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
        Ok((ws, request_id))
    }
}
