//! Bulk-insert client for the analytical store (spec §4.8), speaking the
//! ClickHouse wire protocol via the `clickhouse` crate. Insert settings and
//! the connectivity probe are ported from
//! `original_source/Parser/app/core/task_process.py::TaskProcess.init`'s
//! `ck_set` dict and `SELECT 1` check.

use clickhouse::Row;
use nds_core::config::StoreConfig;
use nds_core::error::{NdsError, NdsResult};
use serde::Serialize;

/// One decoded measurement record, flattened for insertion. The decoder's
/// per-field business logic is out of scope (spec.md §1); `record` carries
/// the decoder's JSON output verbatim so the pipeline remains exercised
/// end-to-end even with the reference decoder plugged in.
#[derive(Debug, Clone, Serialize, Row)]
pub struct MeasurementRow {
    pub enodebid: u64,
    pub file_path: String,
    pub sub_file_name: String,
    pub record: String,
}

pub struct AnalyticalStoreClient {
    client: clickhouse::Client,
}

impl AnalyticalStoreClient {
    pub fn new(cfg: &StoreConfig) -> Self {
        let client = clickhouse::Client::default()
            .with_url(&cfg.url)
            .with_database(&cfg.database)
            .with_user(&cfg.user)
            .with_password(&cfg.password)
            .with_option("max_insert_threads", "2")
            .with_option("insert_distributed_sync", "0")
            .with_option("async_insert", "1")
            .with_option("wait_for_async_insert", "0");
        Self { client }
    }

    /// `SELECT 1` connectivity probe. One reconnect attempt, then fail —
    /// matching the Python client's init-time check.
    pub async fn probe(&self) -> NdsResult<()> {
        if self.select_one().await.is_ok() {
            return Ok(());
        }
        self.select_one().await
    }

    async fn select_one(&self) -> NdsResult<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|e| NdsError::Store(e.to_string()))
    }

    /// Bulk-inserts `rows` into `table` with the fixed insert settings from
    /// spec §4.8.
    pub async fn bulk_insert(&self, table: &str, rows: &[MeasurementRow]) -> NdsResult<()> {
        let mut insert = self
            .client
            .insert(table)
            .map_err(|e| NdsError::Store(e.to_string()))?;
        for row in rows {
            insert
                .write(row)
                .await
                .map_err(|e| NdsError::Store(e.to_string()))?;
        }
        insert.end().await.map_err(|e| NdsError::Store(e.to_string()))
    }
}
