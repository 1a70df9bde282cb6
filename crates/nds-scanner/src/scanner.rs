//! Scanner loop (C7): periodic remote listing, new-file detection, and
//! batched submission to the backend. Grounded on
//! `original_source/Scanner/app/services/scanner.py`'s `Scanner` class:
//! the adaptive interval formula, the embedded-timestamp sort key, the
//! per-data-type MRO/MDT scan with its own root and filter, the
//! `zip_info`-then-`batch_add_tasks` pipeline, the 10MB batch cap, and the
//! per-second stop-flag poll are all taken verbatim from there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use nds_core::backend::{BackendClient, BackendResult};
use nds_core::model::{extract_timestamp, DataType, RemoteServer, TaggedZipEntry, ZipEntry};
use tracing::{debug, info, warn};

use crate::gateway_client::GatewayClient;

/// Falls before any real embedded timestamp, so files the regex can't
/// parse sort first — matching the Python fallback sort key.
fn fallback_sort_key() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("0001-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Cap on a single batch's serialized size before it's submitted, matching
/// `MAX_BATCH_SIZE` in the Python scanner.
const MAX_BATCH_SIZE_BYTES: usize = 10 * 1024 * 1024;

pub struct ScannerConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
        }
    }
}

/// A newly discovered file, tagged with the data type of the root it was
/// found under (`scanner.py::scan_loop`'s `{'path': path, 'type': 'MRO'}`).
struct NewFile {
    path: String,
    data_type: DataType,
}

pub struct Scanner {
    gateway: GatewayClient,
    backend: BackendClient,
    servers: Vec<RemoteServer>,
    cfg: ScannerConfig,
    stop_flag: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(
        gateway: GatewayClient,
        backend: BackendClient,
        servers: Vec<RemoteServer>,
        cfg: ScannerConfig,
    ) -> Self {
        Self {
            gateway,
            backend,
            servers,
            cfg,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Runs until `stop()` is called, checking the flag once per second so
    /// shutdown latency is bounded even mid-sleep.
    pub async fn run(&self) {
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!("scanner stop flag set, exiting loop");
                return;
            }
            let started = Instant::now();
            self.scan_all_servers().await;
            let elapsed = started.elapsed();
            let interval = self.cfg.max_interval.saturating_sub(elapsed).max(self.cfg.min_interval);
            debug!(elapsed_ms = elapsed.as_millis() as u64, next_interval_secs = interval.as_secs(), "scan cycle complete");
            if !self.wait_or_stop(interval).await {
                return;
            }
        }
    }

    async fn wait_or_stop(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    async fn scan_all_servers(&self) {
        for server in &self.servers {
            if let Err(err) = self.scan_server(server).await {
                warn!(server_id = %server.id, %err, "scan failed for server");
            }
        }
    }

    /// One scan cycle for a single server: scan each data type's root under
    /// its own filter, drop already-known files, order by embedded
    /// timestamp, then fetch each new file's zip entries and submit them in
    /// `TaggedZipEntry` batches (spec §4.7 steps 2-4).
    async fn scan_server(&self, server: &RemoteServer) -> anyhow::Result<()> {
        let mut new_files: Vec<NewFile> = Vec::new();

        for (data_type, root, filter) in server.scan_targets() {
            if root.is_empty() {
                continue;
            }
            let filter_opt = if filter.is_empty() { None } else { Some(filter) };
            let entries = match self.gateway.scan(&server.id, root, filter_opt).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(server_id = %server.id, ?data_type, %err, "scan failed for data type");
                    continue;
                }
            };
            let paths: Vec<String> = entries
                .get("entries")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter(|e| !e.get("is_dir").and_then(|d| d.as_bool()).unwrap_or(false))
                        .filter_map(|e| e.get("path")?.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            if paths.is_empty() {
                continue;
            }
            let known = self.filter_known(server, data_type, &paths).await?;
            new_files.extend(
                paths
                    .into_iter()
                    .filter(|p| !known.contains(p))
                    .map(|path| NewFile { path, data_type }),
            );
        }

        if new_files.is_empty() {
            return Ok(());
        }

        // Sort by the embedded timestamp; files without one sort first.
        new_files.sort_by_key(|f| extract_timestamp(&f.path).unwrap_or_else(fallback_sort_key));

        info!(server_id = %server.id, count = new_files.len(), "discovered new files");
        self.submit_in_batches(server, new_files).await;
        Ok(())
    }

    async fn filter_known(
        &self,
        server: &RemoteServer,
        data_type: DataType,
        paths: &[String],
    ) -> anyhow::Result<std::collections::HashSet<String>> {
        match self.backend.filter_known_files(&server.id, data_type, paths).await {
            BackendResult::Ok(value) => Ok(value
                .get("known")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|p| p.as_str().map(String::from)).collect())
                .unwrap_or_default()),
            BackendResult::RateLimited => {
                warn!(server_id = %server.id, "filter request rate-limited, assuming nothing known");
                Ok(std::collections::HashSet::new())
            }
            other => Err(anyhow::anyhow!("filter_known_files failed: {other:?}")),
        }
    }

    /// Walks each new file in order, pulling its zip entries via `zip_info`
    /// and accumulating `TaggedZipEntry` batches sized by serialized JSON
    /// bytes, matching `scanner.py::scan_loop`'s `batch_data`/`batch_size`
    /// loop exactly (including dropping the batch outright on a 429).
    async fn submit_in_batches(&self, server: &RemoteServer, files: Vec<NewFile>) {
        let mut batch: Vec<TaggedZipEntry> = Vec::new();
        let mut batch_bytes = 0usize;

        for file in files {
            let zip_value = match self.gateway.zip_info(&server.id, &file.path).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(server_id = %server.id, path = %file.path, %err, "zip_info failed, skipping file");
                    continue;
                }
            };
            let entries: Vec<ZipEntry> = match zip_value.get("entries") {
                Some(v) => match serde_json::from_value(v.clone()) {
                    Ok(e) => e,
                    Err(err) => {
                        warn!(server_id = %server.id, path = %file.path, %err, "zip_info response malformed, skipping file");
                        continue;
                    }
                },
                None => continue,
            };
            if entries.is_empty() {
                continue;
            }
            let tagged: Vec<TaggedZipEntry> = entries
                .into_iter()
                .map(|entry| TaggedZipEntry {
                    entry,
                    nds_id: server.id.clone(),
                    data_type: file.data_type,
                })
                .collect();
            let current_size = serde_json::to_vec(&tagged).map(|v| v.len()).unwrap_or(0);

            if !batch.is_empty() && batch_bytes + current_size > MAX_BATCH_SIZE_BYTES {
                if !self.flush_batch(server, &mut batch).await {
                    // 429: drop the unsubmitted batch and stop this cycle,
                    // matching the Python scanner's `break` on redis overload.
                    batch_bytes = 0;
                    break;
                }
                batch_bytes = 0;
            }

            batch_bytes += current_size;
            batch.extend(tagged);
        }

        if !batch.is_empty() {
            self.flush_batch(server, &mut batch).await;
        }
    }

    /// Submits `batch` via `batch_add_tasks`, returning `false` on a 429 so
    /// the caller can stop the cycle rather than keep accumulating.
    async fn flush_batch(&self, server: &RemoteServer, batch: &mut Vec<TaggedZipEntry>) -> bool {
        let ok = match self.backend.submit_batch(&server.id, batch).await {
            BackendResult::Ok(_) => {
                info!(server_id = %server.id, count = batch.len(), "submitted new-file batch");
                true
            }
            BackendResult::RateLimited => {
                // Matches the Python scanner: a 429 drops the whole batch
                // rather than retrying, since the next scan cycle will
                // rediscover the same files.
                warn!(server_id = %server.id, count = batch.len(), "batch submission rate-limited, dropping batch");
                false
            }
            other => {
                warn!(server_id = %server.id, count = batch.len(), ?other, "batch submission failed");
                true
            }
        };
        batch.clear();
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_sort_key_precedes_real_timestamps() {
        let fallback = fallback_sort_key();
        let real = extract_timestamp("A_20240101010101_x.zip").unwrap();
        assert!(fallback < real);
    }
}
