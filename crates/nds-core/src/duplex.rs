//! Duplex message-framed transport shared by the Gateway's axum WebSocket
//! endpoint and the Scanner/Parser's `tokio-tungstenite` client connections
//! (spec §4.4). One frame enum and its JSON shape is defined here and
//! converted to/from whichever `Message` type each end's library uses, so
//! both halves of the wire protocol stay byte-for-byte identical.

use serde::{Deserialize, Serialize};

/// Control frame carried as a JSON text frame, grounded on
/// `original_source/Gateway/app/services/ws_manager.py`'s `send_response`
/// and `send_file` message shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nds_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Response,
    File,
    Check,
    Error,
    /// Marks the start of a `file` stream before the first binary chunk.
    Start,
    /// Marks the end of a `file` stream; no further binary chunks follow.
    End,
}

impl ControlFrame {
    pub fn response(request_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: FrameType::Response,
            code: Some(200),
            from_api: None,
            nds_id: None,
            message: None,
            data: Some(data),
            request_id: Some(request_id.into()),
        }
    }

    pub fn error(request_id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Error,
            code: Some(code),
            from_api: None,
            nds_id: None,
            message: Some(message.into()),
            data: None,
            request_id: Some(request_id.into()),
        }
    }

    /// A liveness check frame, carrying the sender's unix-epoch seconds as
    /// its `data` payload (spec §4.4; `ws_manager.py::_check_single_connection`
    /// sends `WS_RESPONSE(type=CHECK, data=int(time.time()))`).
    pub fn check(epoch_secs: u64) -> Self {
        Self {
            frame_type: FrameType::Check,
            code: None,
            from_api: None,
            nds_id: None,
            message: None,
            data: Some(serde_json::json!(epoch_secs)),
            request_id: None,
        }
    }

    pub fn file_start(request_id: impl Into<String>, total_size: u64) -> Self {
        Self {
            frame_type: FrameType::Start,
            code: None,
            from_api: None,
            nds_id: None,
            message: None,
            data: Some(serde_json::json!({ "total_size": total_size })),
            request_id: Some(request_id.into()),
        }
    }

    pub fn file_end(request_id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::End,
            code: None,
            from_api: None,
            nds_id: None,
            message: None,
            data: None,
            request_id: Some(request_id.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ControlFrame always serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A request sent over the duplex channel (spec §4.4 `Request`): the three
/// Gateway operations (`scan`, `read`, `zip_info`) plus their arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "snake_case")]
pub enum DuplexRequest {
    Scan {
        nds_id: String,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        filter: Option<String>,
    },
    Read {
        nds_id: String,
        path: String,
        offset: u64,
        size: Option<u64>,
    },
    ZipInfo { nds_id: String, path: String },
}

/// Protocol-agnostic frame, independent of which WebSocket crate produced
/// or will consume it.
#[derive(Debug, Clone)]
pub enum DuplexMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl From<DuplexMessage> for axum::extract::ws::Message {
    fn from(msg: DuplexMessage) -> Self {
        use axum::extract::ws::Message as AxumMessage;
        match msg {
            DuplexMessage::Text(t) => AxumMessage::Text(t),
            DuplexMessage::Binary(b) => AxumMessage::Binary(b),
            DuplexMessage::Ping(p) => AxumMessage::Ping(p),
            DuplexMessage::Pong(p) => AxumMessage::Pong(p),
            DuplexMessage::Close => AxumMessage::Close(None),
        }
    }
}

impl From<axum::extract::ws::Message> for DuplexMessage {
    fn from(msg: axum::extract::ws::Message) -> Self {
        use axum::extract::ws::Message as AxumMessage;
        match msg {
            AxumMessage::Text(t) => DuplexMessage::Text(t),
            AxumMessage::Binary(b) => DuplexMessage::Binary(b),
            AxumMessage::Ping(p) => DuplexMessage::Ping(p),
            AxumMessage::Pong(p) => DuplexMessage::Pong(p),
            AxumMessage::Close(_) => DuplexMessage::Close,
        }
    }
}

impl From<DuplexMessage> for tokio_tungstenite::tungstenite::Message {
    fn from(msg: DuplexMessage) -> Self {
        use tokio_tungstenite::tungstenite::Message as TMessage;
        match msg {
            DuplexMessage::Text(t) => TMessage::Text(t),
            DuplexMessage::Binary(b) => TMessage::Binary(b),
            DuplexMessage::Ping(p) => TMessage::Ping(p),
            DuplexMessage::Pong(p) => TMessage::Pong(p),
            DuplexMessage::Close => TMessage::Close(None),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Message> for DuplexMessage {
    fn from(msg: tokio_tungstenite::tungstenite::Message) -> Self {
        use tokio_tungstenite::tungstenite::Message as TMessage;
        match msg {
            TMessage::Text(t) => DuplexMessage::Text(t),
            TMessage::Binary(b) => DuplexMessage::Binary(b),
            TMessage::Ping(p) => DuplexMessage::Ping(p),
            TMessage::Pong(p) => DuplexMessage::Pong(p),
            TMessage::Close(_) => DuplexMessage::Close,
            TMessage::Frame(_) => DuplexMessage::Close,
        }
    }
}

/// Splits a byte buffer into `chunk_size`-sized binary frames, the unit
/// `send_file` streams after its `start` control frame (spec §4.4).
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(chunk_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_round_trips_through_json() {
        let frame = ControlFrame::response("req-1", serde_json::json!({ "ok": true }));
        let json = frame.to_json();
        let parsed = ControlFrame::from_json(&json).unwrap();
        assert_eq!(parsed.frame_type, FrameType::Response);
        assert_eq!(parsed.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn chunking_covers_every_byte_exactly_once() {
        let data = vec![7u8; 1_000_001];
        let chunks: Vec<_> = chunk_bytes(&data, 512 * 1024).collect();
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), data.len());
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 512 * 1024));
    }

    #[test]
    fn duplex_request_tags_discriminate_api() {
        let req = DuplexRequest::Read {
            nds_id: "srv-1".into(),
            path: "/a/b.zip".into(),
            offset: 0,
            size: Some(1024),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"api\":\"read\""));
    }
}
