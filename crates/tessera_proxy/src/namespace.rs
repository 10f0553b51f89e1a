//! The namespace as sessions see it: config plus the compiled routing table,
//! slices, sequences, and blacklist.

use std::collections::HashSet;
use std::sync::Arc;

use tessera_backend::{Connector, SliceSet};
use tessera_common::config::NamespaceConfig;
use tessera_common::error::ProxyResult;
use tessera_mysql::fingerprint::fingerprint;
use tessera_route::{Router, SequenceRegistry};

pub struct NamespaceView {
    pub config: NamespaceConfig,
    pub router: Router,
    pub sequences: SequenceRegistry,
    pub slices: SliceSet,
    blacklist: HashSet<String>,
}

impl NamespaceView {
    pub fn new(config: NamespaceConfig, connector: Arc<dyn Connector>) -> ProxyResult<Arc<Self>> {
        config
            .validate()
            .map_err(tessera_common::ProxyError::Internal)?;
        let router = Router::from_namespace(&config)?;
        let slices = SliceSet::from_namespace(&config, connector);
        let blacklist = config
            .blacklist
            .iter()
            .map(|sql| fingerprint(sql))
            .collect();
        Ok(Arc::new(Self {
            config,
            router,
            sequences: SequenceRegistry::new(),
            slices,
            blacklist,
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// True when the statement's fingerprint is forbidden.
    pub fn is_blacklisted(&self, canonical: &str) -> bool {
        self.blacklist.contains(canonical)
    }

    pub fn is_allowed_db(&self, db: &str) -> bool {
        self.config.is_allowed_db(db)
    }

    pub fn default_phy_db(&self, db: &str) -> Option<&str> {
        self.config.default_phy_db(db)
    }

    pub fn is_read_only_user(&self, user: &str) -> bool {
        self.config
            .user(user)
            .map(|u| u.read_only)
            .unwrap_or(false)
    }

    pub fn is_rw_split_user(&self, user: &str) -> bool {
        self.config
            .user(user)
            .map(|u| u.rw_split)
            .unwrap_or(false)
    }
}
