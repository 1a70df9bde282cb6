//! HTTP client for the control-plane backend, grounded on the teacher's
//! `shipping/client.rs`: the same `Result`-shaped retry ladder (rate-limited
//! with jittered backoff, distinguish client/server/connect failures) is
//! reused here for every outbound call a node makes to the backend
//! (`/parser/<id>`, `/config/get`, `/ndsfiles/updateTaskStatus`,
//! `/ndsfiles/filter`, `/ndsfiles/batch`).

use std::time::Duration;

use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::model::{DataType, TaskStatus};

/// Outcome of a single backend call, mirroring the teacher's `ShipResult`.
#[derive(Debug)]
pub enum BackendResult<T> {
    Ok(T),
    RateLimited,
    ServerError(u16),
    ClientError(u16),
    ConnectError(String),
}

const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 30_000;

pub struct BackendClient {
    http: reqwest::Client,
    cfg: BackendConfig,
}

impl BackendClient {
    pub fn new(cfg: BackendConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { http, cfg }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    /// POST with the teacher's 429 jittered-backoff retry loop. Any one
    /// retryable failure below `MAX_RETRIES` is retried; exhausting retries
    /// surfaces the last-seen outcome to the caller.
    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> BackendResult<T> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            let resp = self.http.post(&url).json(body).send().await;
            match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return match resp.json::<T>().await {
                            Ok(value) => BackendResult::Ok(value),
                            Err(err) => {
                                warn!(%err, %path, "backend response decode failed");
                                BackendResult::ServerError(status.as_u16())
                            }
                        };
                    }
                    if status.as_u16() == 429 && attempt < MAX_RETRIES {
                        let delay = jittered_backoff(attempt);
                        debug!(attempt, delay_ms = delay.as_millis() as u64, %path, "rate limited, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if status.as_u16() == 429 {
                        return BackendResult::RateLimited;
                    }
                    if status.is_server_error() && attempt < MAX_RETRIES {
                        let delay = jittered_backoff(attempt);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if status.is_server_error() {
                        return BackendResult::ServerError(status.as_u16());
                    }
                    return BackendResult::ClientError(status.as_u16());
                }
                Err(err) => {
                    if attempt < MAX_RETRIES {
                        let delay = jittered_backoff(attempt);
                        warn!(%err, attempt, %path, "connect error, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return BackendResult::ConnectError(err.to_string());
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let url = self.url(path);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<T>().await {
                Ok(value) => BackendResult::Ok(value),
                Err(err) => {
                    warn!(%err, %path, "backend response decode failed");
                    BackendResult::ServerError(502)
                }
            },
            Ok(resp) if resp.status().as_u16() == 429 => BackendResult::RateLimited,
            Ok(resp) if resp.status().is_server_error() => {
                BackendResult::ServerError(resp.status().as_u16())
            }
            Ok(resp) => BackendResult::ClientError(resp.status().as_u16()),
            Err(err) => BackendResult::ConnectError(err.to_string()),
        }
    }

    /// `GET /parser/<id>` — this parser/scanner/gateway node's assigned
    /// remote-server roster.
    pub async fn get_assigned_servers(&self, node_id: &str) -> BackendResult<Value> {
        self.get_json(&format!("/parser/{node_id}")).await
    }

    /// `GET /config/get` — runtime tunables (intervals, batch sizes).
    pub async fn get_config(&self) -> BackendResult<Value> {
        self.get_json("/config/get").await
    }

    /// `POST /ndsfiles/updateTaskStatus` — the single terminal status write
    /// per task (spec §6 I-3).
    pub async fn update_task_status(
        &self,
        nds_id: &str,
        file_path: &str,
        status: TaskStatus,
    ) -> BackendResult<Value> {
        let body = serde_json::json!({
            "nds_id": nds_id,
            "file_path": file_path,
            "status": status as i8,
        });
        self.post_json("/ndsfiles/updateTaskStatus", &body).await
    }

    /// `POST /ndsfiles/filter` — check which discovered files of a given
    /// data type are already known, so the scan loop only submits genuinely
    /// new ones (`scanner.py::scan_loop` calls this once per MRO/MDT root).
    pub async fn filter_known_files(
        &self,
        nds_id: &str,
        data_type: DataType,
        paths: &[String],
    ) -> BackendResult<Value> {
        let body = serde_json::json!({ "nds_id": nds_id, "data_type": data_type, "paths": paths });
        self.post_json("/ndsfiles/filter", &body).await
    }

    /// `POST /ndsfiles/batch` — submit a batch of newly discovered files,
    /// capped by the caller at spec.md's `MAX_BATCH_SIZE` (10MB serialized).
    pub async fn submit_batch<T: Serialize>(&self, nds_id: &str, files: &[T]) -> BackendResult<Value> {
        let body = serde_json::json!({ "nds_id": nds_id, "files": files });
        self.post_json("/ndsfiles/batch", &body).await
    }
}

fn jittered_backoff(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = jittered_backoff(0);
        let d5 = jittered_backoff(5);
        assert!(d0.as_millis() >= BASE_BACKOFF_MS as u128);
        assert!(d5 > d0);
        let d_huge = jittered_backoff(20);
        assert!(d_huge.as_millis() <= (MAX_BACKOFF_MS + MAX_BACKOFF_MS / 4 + 1) as u128);
    }
}
