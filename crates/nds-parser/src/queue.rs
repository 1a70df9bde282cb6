//! Task queue (C6): a Redis-backed multi-queue broker keyed
//! `task_for_nds:<id>`, grounded on
//! `original_source/Parser/app/core/task_queue.py`'s `TaskQueue` —
//! blocking `BLPOP` across every known source's queue, then "demoting" the
//! key just served to the back of the poll order so other sources get a
//! turn before it's tried again, while FIFO order within one source is
//! preserved (`_adjust_queue_order`).

use std::collections::VecDeque;
use std::time::Duration;

use nds_core::config::RedisConfig;
use nds_core::error::{NdsError, NdsResult};
use nds_core::model::Task;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

fn queue_key(nds_id: &str) -> String {
    format!("task_for_nds:{nds_id}")
}

pub struct TaskQueue {
    conn: Mutex<redis::aio::MultiplexedConnection>,
    order: Mutex<VecDeque<String>>,
    blpop_timeout: Duration,
}

impl TaskQueue {
    pub async fn connect(cfg: &RedisConfig) -> NdsResult<Self> {
        let client = redis::Client::open(cfg.url.as_str())
            .map_err(|e| NdsError::Backend(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| NdsError::Backend(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            order: Mutex::new(VecDeque::new()),
            blpop_timeout: cfg.blpop_timeout,
        })
    }

    /// Registers a source's queue key in the round-robin poll order if not
    /// already present. Idempotent so callers can call it on every
    /// assignment refresh without duplicating entries.
    pub async fn register_source(&self, nds_id: &str) {
        let key = queue_key(nds_id);
        let mut order = self.order.lock().await;
        if !order.contains(&key) {
            order.push_back(key);
        }
    }

    /// Pushes a task onto its source's queue (used by tests and by any
    /// in-process producer; in production the backend pushes directly).
    pub async fn push(&self, task: &Task) -> NdsResult<()> {
        let key = queue_key(&task.nds_id);
        let payload = serde_json::to_string(task).map_err(|e| NdsError::Backend(e.to_string()))?;
        let mut conn = self.conn.lock().await;
        conn.rpush::<_, _, ()>(&key, payload)
            .await
            .map_err(|e| NdsError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Blocks (up to `blpop_timeout`) across every registered source's
    /// queue in round-robin order, returning the first task found and
    /// rotating that source to the back of the order.
    pub async fn pop_task(&self) -> NdsResult<Option<Task>> {
        let keys: Vec<String> = {
            let order = self.order.lock().await;
            order.iter().cloned().collect()
        };
        if keys.is_empty() {
            tokio::time::sleep(self.blpop_timeout).await;
            return Ok(None);
        }

        let mut conn = self.conn.lock().await;
        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&keys)
            .arg(self.blpop_timeout.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .map_err(|e| NdsError::Backend(e.to_string()))?;
        drop(conn);

        match result {
            Some((served_key, payload)) => {
                self.adjust_queue_order(&served_key).await;
                let task: Task = serde_json::from_str(&payload)
                    .map_err(|e| NdsError::Backend(format!("malformed task payload: {e}")))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn adjust_queue_order(&self, served_key: &str) {
        let mut order = self.order.lock().await;
        if let Some(pos) = order.iter().position(|k| k == served_key) {
            if let Some(key) = order.remove(pos) {
                debug!(key = %key, "demoting queue to back of poll order");
                order.push_back(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_key_format() {
        assert_eq!(queue_key("srv-1"), "task_for_nds:srv-1");
    }
}
