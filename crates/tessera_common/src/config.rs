//! Namespace and proxy configuration model.
//!
//! Loading (files, admin API, hot reload transport) is the job of an external
//! collaborator; these structs are the contract it fills. A namespace is the
//! unit of multi-tenancy: one logical database surface, its physical slices,
//! and its sharding rules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level proxy tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upper bound for `offset + count` after the cross-shard LIMIT rewrite.
    #[serde(default = "default_max_merge_limit")]
    pub max_merge_limit: u64,
    /// Streaming flush delay in milliseconds.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    /// Per-query deadline in milliseconds (0 = none).
    #[serde(default)]
    pub query_timeout_ms: u64,
}

fn default_max_merge_limit() -> u64 {
    1 << 20
}

fn default_flush_delay_ms() -> u64 {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_merge_limit: default_max_merge_limit(),
            flush_delay_ms: default_flush_delay_ms(),
            query_timeout_ms: 0,
        }
    }
}

/// Backend connection pool tuning, per endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Max live connections per endpoint (0 = unlimited).
    pub max_size: usize,
    /// Acquire wait budget in milliseconds (0 = wait forever).
    pub acquire_timeout_ms: u64,
    /// Ping idle connections on acquire and replace the dead ones.
    #[serde(default = "default_true")]
    pub ping_on_acquire: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 64,
            acquire_timeout_ms: 30_000,
            ping_on_acquire: true,
        }
    }
}

/// One slice: a master endpoint plus read replicas sharing the same data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceConfig {
    pub name: String,
    pub master: String,
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// How a rule carves the shard-key value space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// `value mod shard_count` style; the table/db inline expressions decide
    /// the physical names.
    Hash,
    /// Explicit integer boundaries; shard i covers `[bounds[i-1], bounds[i])`.
    Range,
}

/// Sharding rule for one logical table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub db: String,
    pub table: String,
    /// Ordered sharding columns; the first is the routing column.
    pub sharding_columns: Vec<String>,
    /// Inline expression for the physical database names (None = the
    /// namespace default physical db everywhere).
    #[serde(default)]
    pub db_expr: Option<String>,
    /// Inline expression for the physical table names.
    pub table_expr: String,
    /// Slices carrying the shards, in shard-index order; shard i lives on
    /// `slices[i % slices.len()]`.
    pub slices: Vec<String>,
    pub kind: RuleKind,
    /// Shard count when the table expression carries free variables and the
    /// count cannot be derived by enumerating it.
    #[serde(default)]
    pub shard_count: Option<usize>,
    /// Range rule boundaries (ascending); ignored for hash rules.
    #[serde(default)]
    pub ranges: Vec<i64>,
    /// Bound sequence name for auto-increment on sharded inserts.
    #[serde(default)]
    pub sequence: Option<String>,
}

/// A proxy user as the namespace sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    /// Read-only users get 1290 on DML.
    #[serde(default)]
    pub read_only: bool,
    /// Route this user's reads to replicas.
    #[serde(default)]
    pub rw_split: bool,
}

/// One namespace: the logical database surface a set of users sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,
    /// Logical databases clients may USE.
    pub allowed_dbs: Vec<String>,
    /// logical db -> default physical db (for non-sharded tables).
    pub default_phy_dbs: HashMap<String, String>,
    /// Slice receiving non-sharded traffic.
    pub default_slice: String,
    pub slices: Vec<SliceConfig>,
    #[serde(default)]
    pub rules: Vec<TableRuleConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// Fingerprints of forbidden statements.
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default = "default_charset")]
    pub default_charset: String,
    #[serde(default = "default_collation_id")]
    pub default_collation_id: u16,
}

fn default_charset() -> String {
    "utf8mb4".into()
}

fn default_collation_id() -> u16 {
    45 // utf8mb4_general_ci
}

impl NamespaceConfig {
    /// Structural validation; referenced names must exist.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("namespace name is empty".into());
        }
        if self.slices.is_empty() {
            return Err(format!("namespace {} has no slices", self.name));
        }
        if !self.slices.iter().any(|s| s.name == self.default_slice) {
            return Err(format!(
                "default slice {} is not defined in namespace {}",
                self.default_slice, self.name
            ));
        }
        for db in &self.allowed_dbs {
            if !self.default_phy_dbs.contains_key(db) {
                return Err(format!("allowed db {db} has no default physical db"));
            }
        }
        for rule in &self.rules {
            if rule.sharding_columns.is_empty() {
                return Err(format!("rule {}.{} has no sharding columns", rule.db, rule.table));
            }
            if rule.slices.is_empty() {
                return Err(format!("rule {}.{} names no slices", rule.db, rule.table));
            }
            for s in &rule.slices {
                if !self.slices.iter().any(|sc| &sc.name == s) {
                    return Err(format!("rule {}.{} references unknown slice {s}", rule.db, rule.table));
                }
            }
            if rule.kind == RuleKind::Range && rule.ranges.is_empty() {
                return Err(format!("range rule {}.{} has no boundaries", rule.db, rule.table));
            }
        }
        Ok(())
    }

    pub fn is_allowed_db(&self, db: &str) -> bool {
        self.allowed_dbs.iter().any(|d| d == db)
    }

    pub fn default_phy_db(&self, db: &str) -> Option<&str> {
        self.default_phy_dbs.get(db).map(|s| s.as_str())
    }

    pub fn user(&self, username: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.username == username)
    }
}
