//! The routing table: `(logical_db, logical_table)` → rule, with atomic
//! snapshot swap on config reload.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_common::config::NamespaceConfig;
use tessera_common::error::ProxyResult;

use crate::rule::TableRule;

/// Lookup outcome. Non-sharded tables route whole to the default slice.
#[derive(Debug, Clone)]
pub enum RuleMatch {
    Sharded(Arc<TableRule>),
    Default { slice: String },
}

impl RuleMatch {
    pub fn as_sharded(&self) -> Option<&Arc<TableRule>> {
        match self {
            RuleMatch::Sharded(rule) => Some(rule),
            RuleMatch::Default { .. } => None,
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    rules: HashMap<(String, String), Arc<TableRule>>,
    default_slice: String,
}

/// Read-mostly routing table. Readers clone the current snapshot `Arc`;
/// reloads swap the whole snapshot so an in-flight statement never sees a
/// half-updated table.
pub struct Router {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Router {
    pub fn from_namespace(ns: &NamespaceConfig) -> ProxyResult<Self> {
        Ok(Self {
            snapshot: RwLock::new(Arc::new(Self::build_snapshot(ns)?)),
        })
    }

    /// Replace the routing table (hot reload).
    pub fn reload(&self, ns: &NamespaceConfig) -> ProxyResult<()> {
        let fresh = Arc::new(Self::build_snapshot(ns)?);
        *self.snapshot.write() = fresh;
        tracing::debug!(namespace = %ns.name, "routing table reloaded");
        Ok(())
    }

    fn build_snapshot(ns: &NamespaceConfig) -> ProxyResult<Snapshot> {
        let mut rules = HashMap::with_capacity(ns.rules.len());
        for cfg in &ns.rules {
            let rule = Arc::new(TableRule::compile(cfg)?);
            rules.insert((rule.db.clone(), rule.table.clone()), rule);
        }
        Ok(Snapshot {
            rules,
            default_slice: ns.default_slice.clone(),
        })
    }

    /// Find the rule for a logical table; `Default` is the no-rule sentinel.
    pub fn rule(&self, db: &str, table: &str) -> RuleMatch {
        let snap = self.snapshot.read().clone();
        match snap
            .rules
            .get(&(db.to_lowercase(), table.to_lowercase()))
        {
            Some(rule) => RuleMatch::Sharded(rule.clone()),
            None => RuleMatch::Default {
                slice: snap.default_slice.clone(),
            },
        }
    }

    pub fn default_slice(&self) -> String {
        self.snapshot.read().default_slice.clone()
    }

    /// True if any rule shards this logical db.
    pub fn has_rules_for_db(&self, db: &str) -> bool {
        let db = db.to_lowercase();
        self.snapshot.read().rules.keys().any(|(d, _)| *d == db)
    }
}
