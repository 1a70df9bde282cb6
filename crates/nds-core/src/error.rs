//! Shared error type for the NDS pipeline.
//!
//! Mirrors the kind taxonomy in spec §7 and the Python `NDSError` family
//! (`NDSConnectError`/`NDSFileNotFoundError`/`NDSZipError`/`NDSIOError`):
//! every remote-facing error carries the originating server id and a level
//! tag so callers can decide whether to retry or evict a pooled client.

use thiserror::Error;

/// Severity/origin tag carried on remote-facing errors (mirrors the
/// Python `NDSError.level` field — callers use it to decide retry vs evict).
pub type ErrorLevel = i32;

#[derive(Debug, Error)]
pub enum NdsError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connect error (server={server_id}, level={level}): {message}")]
    Connect {
        server_id: String,
        level: ErrorLevel,
        message: String,
    },

    #[error("file not found (server={server_id}): {path}")]
    FileNotFound { server_id: String, path: String },

    #[error("io error (server={server_id}, level={level}): {message}")]
    Io {
        server_id: String,
        level: ErrorLevel,
        message: String,
    },

    #[error("zip error: {0}")]
    Zip(String),

    #[error("protocol error (code={code}): {message}")]
    Protocol { code: u16, message: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("analytical store error: {0}")]
    Store(String),

    #[error("cancelled")]
    Cancelled,
}

impl NdsError {
    pub fn connect(server_id: impl Into<String>, level: ErrorLevel, message: impl Into<String>) -> Self {
        Self::Connect {
            server_id: server_id.into(),
            level,
            message: message.into(),
        }
    }

    pub fn io(server_id: impl Into<String>, level: ErrorLevel, message: impl Into<String>) -> Self {
        Self::Io {
            server_id: server_id.into(),
            level,
            message: message.into(),
        }
    }

    pub fn file_not_found(server_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::FileNotFound {
            server_id: server_id.into(),
            path: path.into(),
        }
    }

    /// HTTP-ish status code for this error, used when mapping to a C4
    /// error frame (spec §4.4: 400 bad args, 404 unknown api, 500 uncaught).
    pub fn status_code(&self) -> u16 {
        match self {
            NdsError::Protocol { code, .. } => *code,
            NdsError::FileNotFound { .. } => 404,
            NdsError::Config(_) => 400,
            _ => 500,
        }
    }
}

pub type NdsResult<T> = Result<T, NdsError>;
