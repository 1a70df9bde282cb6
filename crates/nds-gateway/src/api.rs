//! Gateway API (C5): request dispatch shared by the duplex transport and
//! the plain-HTTP control surface, with the error-code mapping from
//! `original_source/Gateway/app/core/gateway.py` (`handle_scan`,
//! `handle_read`, `handle_zip_info`, `handle_websocket_message`): 400 for
//! bad arguments, 404 for an unknown server/file, 500 for anything
//! uncaught.

use std::collections::HashMap;
use std::sync::Arc;

use nds_core::config::DuplexConfig;
use nds_core::duplex::DuplexRequest;
use nds_core::model::RemoteServer;
use tracing::error;

use crate::client::RemoteSession;
use crate::pool::PoolRegistry;
use crate::zip_introspect;

#[derive(Clone)]
pub struct GatewayContext {
    pub servers: Arc<HashMap<String, RemoteServer>>,
    pub pools: Arc<PoolRegistry>,
    pub duplex_cfg: DuplexConfig,
}

pub enum DispatchOutcome {
    Json(serde_json::Value),
    File(Vec<u8>),
    Error(u16, String),
}

pub async fn dispatch(ctx: &GatewayContext, request: DuplexRequest) -> DispatchOutcome {
    match request {
        DuplexRequest::Scan { nds_id, path, filter } => {
            handle_scan(ctx, &nds_id, &path, filter.as_deref()).await
        }
        DuplexRequest::Read {
            nds_id,
            path,
            offset,
            size,
        } => handle_read(ctx, &nds_id, &path, offset, size).await,
        DuplexRequest::ZipInfo { nds_id, path } => handle_zip_info(ctx, &nds_id, &path).await,
    }
}

fn lookup_server<'a>(ctx: &'a GatewayContext, nds_id: &str) -> Result<&'a RemoteServer, DispatchOutcome> {
    ctx.servers
        .get(nds_id)
        .ok_or_else(|| DispatchOutcome::Error(404, format!("unknown server: {nds_id}")))
}

async fn checkout(
    ctx: &GatewayContext,
    server: &RemoteServer,
) -> Result<crate::pool::PooledSession, DispatchOutcome> {
    let pool = ctx.pools.pool_for(server);
    pool.checkout()
        .await
        .map_err(|err| DispatchOutcome::Error(err.status_code(), err.to_string()))
}

async fn handle_scan(ctx: &GatewayContext, nds_id: &str, path: &str, filter: Option<&str>) -> DispatchOutcome {
    let server = match lookup_server(ctx, nds_id) {
        Ok(s) => s,
        Err(out) => return out,
    };
    if path.is_empty() {
        return DispatchOutcome::Error(400, "scan requires a non-empty path".into());
    }
    let session = match checkout(ctx, server).await {
        Ok(s) => s,
        Err(out) => return out,
    };
    match session.scan(path, filter).await {
        Ok(entries) => {
            let payload: Vec<_> = entries
                .into_iter()
                .map(|e| {
                    serde_json::json!({
                        "path": e.path,
                        "size": e.size,
                        "is_dir": e.is_dir,
                    })
                })
                .collect();
            DispatchOutcome::Json(serde_json::json!({ "entries": payload }))
        }
        Err(err) => {
            error!(nds_id, path, %err, "scan failed");
            DispatchOutcome::Error(err.status_code(), err.to_string())
        }
    }
}

async fn handle_read(
    ctx: &GatewayContext,
    nds_id: &str,
    path: &str,
    offset: u64,
    size: Option<u64>,
) -> DispatchOutcome {
    let server = match lookup_server(ctx, nds_id) {
        Ok(s) => s,
        Err(out) => return out,
    };
    let session = match checkout(ctx, server).await {
        Ok(s) => s,
        Err(out) => return out,
    };
    let file_size = match session.stat(path).await {
        Ok(s) => s,
        Err(err) => return DispatchOutcome::Error(err.status_code(), err.to_string()),
    };
    if offset > file_size {
        return DispatchOutcome::Error(400, "read offset past end of file".into());
    }
    // Unspecified size reads to EOF; both are clamped there by read_at.
    let want = size.unwrap_or(file_size - offset).min(file_size - offset);
    match session.read_at(path, offset, want).await {
        Ok(bytes) => DispatchOutcome::File(bytes),
        Err(err) => {
            error!(nds_id, path, offset, %err, "read failed");
            DispatchOutcome::Error(err.status_code(), err.to_string())
        }
    }
}

async fn handle_zip_info(ctx: &GatewayContext, nds_id: &str, path: &str) -> DispatchOutcome {
    let server = match lookup_server(ctx, nds_id) {
        Ok(s) => s,
        Err(out) => return out,
    };
    let session = match checkout(ctx, server).await {
        Ok(s) => s,
        Err(out) => return out,
    };
    let file_size = match session.stat(path).await {
        Ok(s) => s,
        Err(err) => return DispatchOutcome::Error(err.status_code(), err.to_string()),
    };
    let session_ref: &RemoteSession = &session;
    match zip_introspect::get_zip_info(session_ref, path, file_size).await {
        Ok(mut entries) => {
            for entry in &mut entries {
                entry.file_path = path.to_string();
            }
            let payload: Vec<_> = entries
                .into_iter()
                .map(|e| {
                    serde_json::json!({
                        "file_path": e.file_path,
                        "sub_file_name": e.sub_file_name,
                        "header_offset": e.header_offset,
                        "compressed_size": e.compressed_size,
                        "uncompressed_size": e.uncompressed_size,
                        "flag_bits": e.flag_bits,
                        "compress_type": e.compress_type,
                        "enodebid": e.enodebid,
                    })
                })
                .collect();
            DispatchOutcome::Json(serde_json::json!({ "entries": payload }))
        }
        Err(err) => {
            error!(nds_id, path, %err, "zip introspection failed");
            DispatchOutcome::Error(err.status_code(), err.to_string())
        }
    }
}
