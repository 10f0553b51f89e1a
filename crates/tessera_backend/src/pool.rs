//! Per-endpooint connection pool: bounded by a semaphore, with an idle
//! free-list, acquire timeout, optional ping-on-acquire health check, and
//! observable statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use tessera_common::config::PoolConfig;
use tessera_common::error::{BackendError, ProxyError, ProxyResult};

use crate::conn::{BackendConn, Connector, PooledConnect};

/// Observable pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_checkouts: u64,
    pub total_returns: u64,
    pub total_waits: u64,
    pub total_timeouts: u64,
    /// Idle connections replaced after a failed health ping.
    pub total_replaced: u64,
    pub active: u64,
}

#[derive(Default)]
struct PoolStatsInner {
    total_checkouts: AtomicU64,
    total_returns: AtomicU64,
    total_waits: AtomicU64,
    total_timeouts: AtomicU64,
    total_replaced: AtomicU64,
}

impl PoolStatsInner {
    fn snapshot(&self) -> PoolStats {
        let checkouts = self.total_checkouts.load(Ordering::Relaxed);
        let returns = self.total_returns.load(Ordering::Relaxed);
        PoolStats {
            total_checkouts: checkouts,
            total_returns: returns,
            total_waits: self.total_waits.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_replaced: self.total_replaced.load(Ordering::Relaxed),
            active: checkouts.saturating_sub(returns),
        }
    }
}

/// Pool of connections to one backend endpoint. Shared by every session that
/// routes to the endpoint's slice; acquisition serializes internally.
pub struct ConnectionPool {
    slice: String,
    endpoint: String,
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Box<dyn BackendConn>>>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    stats: PoolStatsInner,
}

impl ConnectionPool {
    pub fn new(
        slice: impl Into<String>,
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
    ) -> Arc<Self> {
        let max = if config.max_size == 0 {
            usize::MAX >> 1
        } else {
            config.max_size
        };
        Arc::new(Self {
            slice: slice.into(),
            endpoint: endpoint.into(),
            connector,
            idle: Mutex::new(Vec::new()),
            semaphore: Arc::new(Semaphore::new(max)),
            config,
            stats: PoolStatsInner::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check a connection out, waiting at most the configured acquire
    /// timeout for a free slot.
    pub async fn acquire(self: &Arc<Self>) -> ProxyResult<PooledConnect> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.total_waits.fetch_add(1, Ordering::Relaxed);
                if self.config.acquire_timeout_ms > 0 {
                    let wait = Duration::from_millis(self.config.acquire_timeout_ms);
                    match tokio::time::timeout(wait, self.semaphore.clone().acquire_owned()).await {
                        Ok(Ok(permit)) => permit,
                        _ => {
                            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                            return Err(ProxyError::Backend(BackendError::PoolExhausted {
                                slice: self.slice.clone(),
                            }));
                        }
                    }
                } else {
                    self.semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| ProxyError::Backend(BackendError::PoolExhausted {
                            slice: self.slice.clone(),
                        }))?
                }
            }
        };

        let conn = self.checkout_conn().await?;
        self.stats.total_checkouts.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnect {
            conn: Some(conn),
            pool: self.clone(),
            _permit: Some(permit),
            reset_hint: false,
        })
    }

    async fn checkout_conn(self: &Arc<Self>) -> ProxyResult<Box<dyn BackendConn>> {
        loop {
            let idle = self.idle.lock().pop();
            match idle {
                Some(mut conn) => {
                    if !self.config.ping_on_acquire {
                        return Ok(conn);
                    }
                    if conn.ping().await.is_ok() && !conn.is_closed() {
                        return Ok(conn);
                    }
                    // dead idle conn: replace it
                    self.stats.total_replaced.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(endpoint = %self.endpoint, "replacing dead idle connection");
                }
                None => {
                    return self
                        .connector
                        .connect(&self.endpoint)
                        .await
                        .map_err(|e| match e {
                            err @ ProxyError::Backend(_) => err,
                            other => ProxyError::Backend(BackendError::Unreachable {
                                endpoint: self.endpoint.clone(),
                                reason: other.to_string(),
                            }),
                        });
                }
            }
        }
    }

    pub(crate) fn put_idle(&self, conn: Box<dyn BackendConn>) {
        self.idle.lock().push(conn);
    }

    pub(crate) fn note_return(&self) {
        self.stats.total_returns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
