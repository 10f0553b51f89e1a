//! Slices: one master endpoint plus read replicas, with read/write split.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use tessera_common::config::{NamespaceConfig, SliceConfig};
use tessera_common::error::{BackendError, ProxyError, ProxyResult};

use crate::conn::{Connector, PooledConnect};
use crate::pool::ConnectionPool;

/// A replica set sharing one shard's data.
pub struct Slice {
    name: String,
    master: Arc<ConnectionPool>,
    replicas: Vec<Arc<ConnectionPool>>,
    next_replica: AtomicUsize,
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice").field("name", &self.name).finish()
    }
}

impl Slice {
    pub fn new(cfg: &SliceConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let master = ConnectionPool::new(
            cfg.name.clone(),
            cfg.master.clone(),
            connector.clone(),
            cfg.pool.clone(),
        );
        let replicas = cfg
            .replicas
            .iter()
            .map(|endpoint| {
                ConnectionPool::new(
                    cfg.name.clone(),
                    endpoint.clone(),
                    connector.clone(),
                    cfg.pool.clone(),
                )
            })
            .collect::<Vec<_>>();
        // start the rotation at a random replica so a fleet of proxies
        // doesn't gang up on replica 0
        let start = if replicas.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..replicas.len())
        };
        Arc::new(Self {
            name: cfg.name.clone(),
            master,
            replicas,
            next_replica: AtomicUsize::new(start),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Master connection; writes and transactions always land here.
    pub async fn acquire_write(&self) -> ProxyResult<PooledConnect> {
        self.master.acquire().await
    }

    /// Replica connection, round-robin, falling back to the master when the
    /// slice has no replicas or the chosen replica is unreachable.
    pub async fn acquire_read(&self) -> ProxyResult<PooledConnect> {
        if self.replicas.is_empty() {
            return self.master.acquire().await;
        }
        let idx = self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
        match self.replicas[idx].acquire().await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                tracing::warn!(
                    slice = %self.name,
                    replica = %self.replicas[idx].endpoint(),
                    error = %err,
                    "replica acquire failed, falling back to master"
                );
                self.master.acquire().await
            }
        }
    }

    pub fn master_stats(&self) -> crate::pool::PoolStats {
        self.master.stats()
    }
}

/// All slices of a namespace.
pub struct SliceSet {
    slices: HashMap<String, Arc<Slice>>,
}

impl SliceSet {
    pub fn from_namespace(ns: &NamespaceConfig, connector: Arc<dyn Connector>) -> Self {
        let slices = ns
            .slices
            .iter()
            .map(|cfg| (cfg.name.clone(), Slice::new(cfg, connector.clone())))
            .collect();
        Self { slices }
    }

    pub fn slice(&self, name: &str) -> ProxyResult<Arc<Slice>> {
        self.slices
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::Backend(BackendError::UnknownSlice(name.to_string())))
    }

    pub fn names(&self) -> Vec<&str> {
        self.slices.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use tessera_common::config::PoolConfig;

    fn slice_cfg(replicas: &[&str]) -> SliceConfig {
        SliceConfig {
            name: "s0".into(),
            master: "master:3306".into(),
            replicas: replicas.iter().map(|s| s.to_string()).collect(),
            pool: PoolConfig {
                max_size: 4,
                acquire_timeout_ms: 50,
                ping_on_acquire: false,
            },
        }
    }

    #[tokio::test]
    async fn reads_rotate_over_replicas() {
        let connector = MockConnector::new();
        let slice = Slice::new(&slice_cfg(&["r0:3306", "r1:3306"]), connector.clone());

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2 {
            let mut pc = slice.acquire_read().await.unwrap();
            pc.conn().execute("SELECT 1").await.unwrap();
            seen.insert(pc.endpoint());
            pc.recycle();
        }
        assert_eq!(seen.len(), 2, "both replicas should serve reads");
    }

    #[tokio::test]
    async fn no_replicas_reads_hit_master() {
        let connector = MockConnector::new();
        let slice = Slice::new(&slice_cfg(&[]), connector.clone());
        let pc = slice.acquire_read().await.unwrap();
        assert_eq!(pc.endpoint(), "master:3306");
        pc.recycle();
    }

    #[tokio::test]
    async fn writes_always_hit_master() {
        let connector = MockConnector::new();
        let slice = Slice::new(&slice_cfg(&["r0:3306"]), connector.clone());
        let pc = slice.acquire_write().await.unwrap();
        assert_eq!(pc.endpoint(), "master:3306");
        pc.recycle();
    }

    #[tokio::test]
    async fn slice_set_lookup() {
        let connector = MockConnector::new();
        let ns = NamespaceConfig {
            name: "ns".into(),
            allowed_dbs: vec![],
            default_phy_dbs: HashMap::new(),
            default_slice: "s0".into(),
            slices: vec![slice_cfg(&[])],
            rules: vec![],
            users: vec![],
            blacklist: vec![],
            default_charset: "utf8mb4".into(),
            default_collation_id: 45,
        };
        let set = SliceSet::from_namespace(&ns, connector);
        assert!(set.slice("s0").is_ok());
        assert!(matches!(
            set.slice("nope").unwrap_err(),
            ProxyError::Backend(BackendError::UnknownSlice(_))
        ));
    }
}
