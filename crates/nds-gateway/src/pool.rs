//! Connection pool (C2): the three-step checkout protocol from spec §4.2,
//! grounded on `original_source/Gateway/app/services/nds_pool.py`'s
//! `NDSPool.get_client` — try an idle, healthy connection first; else
//! create one if under capacity; else wait for a return.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use nds_core::error::{NdsError, NdsResult};
use nds_core::model::RemoteServer;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::client::RemoteSession;

pub struct ConnectionPool {
    server: RemoteServer,
    capacity: usize,
    checkout_wait: std::time::Duration,
    idle: Mutex<VecDeque<RemoteSession>>,
    in_flight: AtomicUsize,
    returned: Notify,
}

impl ConnectionPool {
    pub fn new(server: RemoteServer, default_capacity: usize, checkout_wait: std::time::Duration) -> Self {
        let capacity = if server.pool_size > 0 {
            server.pool_size
        } else {
            default_capacity
        };
        Self {
            server,
            capacity,
            checkout_wait,
            idle: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            returned: Notify::new(),
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            server_id: self.server.id.clone(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            idle: self.idle.lock().unwrap().len(),
            capacity: self.capacity,
        }
    }

    /// Step 1: non-blocking take of a healthy idle connection. Step 2:
    /// create a fresh one if under capacity. Step 3: block until a peer
    /// returns a connection or the checkout timeout elapses.
    pub async fn checkout(self: &Arc<Self>) -> NdsResult<PooledSession> {
        let deadline = Instant::now() + self.checkout_wait;
        loop {
            if let Some(session) = self.take_idle() {
                if session.check_connect().await.is_ok() {
                    return Ok(PooledSession {
                        pool: Arc::clone(self),
                        session: Some(session),
                    });
                }
                debug!(server_id = %self.server.id, "dropping unhealthy idle connection");
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }

            if self.try_reserve_slot() {
                match RemoteSession::connect(&self.server).await {
                    Ok(session) => {
                        return Ok(PooledSession {
                            pool: Arc::clone(self),
                            session: Some(session),
                        })
                    }
                    Err(err) => {
                        self.in_flight.fetch_sub(1, Ordering::SeqCst);
                        warn!(server_id = %self.server.id, %err, "pool failed to create connection");
                        return Err(err);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(NdsError::connect(
                    self.server.id.clone(),
                    0,
                    "checkout timed out waiting for a free connection",
                ));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining, self.returned.notified()).await;
        }
    }

    fn take_idle(&self) -> Option<RemoteSession> {
        self.idle.lock().unwrap().pop_front()
    }

    fn try_reserve_slot(&self) -> bool {
        loop {
            let current = self.in_flight.load(Ordering::SeqCst);
            if current >= self.capacity {
                return false;
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn return_session(&self, session: RemoteSession) {
        self.idle.lock().unwrap().push_back(session);
        self.returned.notify_one();
    }

    fn discard_session(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.returned.notify_one();
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatus {
    pub server_id: String,
    pub in_flight: usize,
    pub idle: usize,
    pub capacity: usize,
}

/// A checked-out connection. Returned to the pool's idle queue on drop
/// unless `discard` was called (e.g. after an I/O error that likely means
/// the session is broken and shouldn't be reused).
pub struct PooledSession {
    pool: Arc<ConnectionPool>,
    session: Option<RemoteSession>,
}

impl PooledSession {
    pub fn get(&self) -> &RemoteSession {
        self.session.as_ref().expect("session taken only on drop")
    }

    pub fn discard(mut self) {
        self.session.take();
        self.pool.discard_session();
    }
}

impl std::ops::Deref for PooledSession {
    type Target = RemoteSession;
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.return_session(session);
        }
    }
}

/// Keeps one `ConnectionPool` per registered server, keyed by server id.
pub struct PoolRegistry {
    pools: Mutex<std::collections::HashMap<String, Arc<ConnectionPool>>>,
    default_capacity: usize,
    checkout_wait: std::time::Duration,
}

impl PoolRegistry {
    pub fn new(cfg: nds_core::config::PoolConfig) -> Self {
        Self {
            pools: Mutex::new(std::collections::HashMap::new()),
            default_capacity: cfg.default_pool_size,
            checkout_wait: cfg.checkout_wait,
        }
    }

    pub fn pool_for(&self, server: &RemoteServer) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().unwrap();
        pools
            .entry(server.id.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    server.clone(),
                    self.default_capacity,
                    self.checkout_wait,
                ))
            })
            .clone()
    }

    pub fn all_status(&self) -> Vec<PoolStatus> {
        self.pools
            .lock()
            .unwrap()
            .values()
            .map(|p| p.status())
            .collect()
    }
}
