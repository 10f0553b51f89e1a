//! Sharding rules and shard targeting.

use std::collections::BTreeSet;

use tessera_common::config::{RuleKind, TableRuleConfig};
use tessera_common::error::ProxyError;
use tessera_script::{Bindings, InlineExpression, Scalar};
use xxhash_rust::xxh3::xxh3_64;

/// One physical target a statement must visit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShardTarget {
    /// Shard index; also the transaction visit order.
    pub index: usize,
    pub slice: String,
    pub db: String,
    pub table: String,
}

/// Deterministically ordered, deduplicated set of targets.
pub type ShardSet = Vec<ShardTarget>;

/// A compiled sharding rule for one logical table.
#[derive(Debug, Clone)]
pub struct TableRule {
    pub db: String,
    pub table: String,
    pub sharding_columns: Vec<String>,
    pub db_expr: Option<InlineExpression>,
    pub table_expr: InlineExpression,
    pub slices: Vec<String>,
    pub kind: RuleKind,
    pub ranges: Vec<i64>,
    pub sequence: Option<String>,
    shard_count: usize,
    /// Physical `(db?, table)` names in shard-index order, for broadcast.
    enumeration: Vec<(Option<String>, String)>,
}

impl TableRule {
    /// Compile a rule from config; `default_phy_db` fills targets whose
    /// expressions name no database.
    pub fn compile(cfg: &TableRuleConfig) -> Result<Self, ProxyError> {
        let table_expr = InlineExpression::parse(&cfg.table_expr)?;
        let db_expr = cfg
            .db_expr
            .as_deref()
            .map(InlineExpression::parse)
            .transpose()?;

        let has_vars = !table_expr.free_variables().is_empty()
            || db_expr
                .as_ref()
                .map(|e| !e.free_variables().is_empty())
                .unwrap_or(false);

        let shard_count = match (has_vars, cfg.shard_count, cfg.kind) {
            (_, Some(n), _) if n > 0 => n,
            (false, _, _) => table_expr.enumerate()?.len(),
            (true, _, RuleKind::Range) => cfg.ranges.len() + 1,
            (true, _, RuleKind::Hash) => {
                return Err(ProxyError::Internal(format!(
                    "rule {}.{} uses shard-key variables and needs an explicit shard_count",
                    cfg.db, cfg.table
                )))
            }
        };
        if shard_count == 0 {
            return Err(ProxyError::Internal(format!(
                "rule {}.{} flattens to zero shards",
                cfg.db, cfg.table
            )));
        }

        let mut rule = Self {
            db: cfg.db.to_lowercase(),
            table: cfg.table.to_lowercase(),
            sharding_columns: cfg
                .sharding_columns
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            db_expr,
            table_expr,
            slices: cfg.slices.clone(),
            kind: cfg.kind,
            ranges: cfg.ranges.clone(),
            sequence: cfg.sequence.clone(),
            shard_count,
            enumeration: Vec::new(),
        };
        rule.enumeration = rule.enumerate_targets()?;
        Ok(rule)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// The routing column (the first sharding column).
    pub fn routing_column(&self) -> &str {
        &self.sharding_columns[0]
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        self.sharding_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Map a shard-key value to its shard index.
    pub fn shard_index(&self, value: &Scalar) -> Option<usize> {
        match self.kind {
            RuleKind::Hash => match value {
                Scalar::Int(v) => Some((v.rem_euclid(self.shard_count as i64)) as usize),
                Scalar::Str(s) => Some((xxh3_64(s.as_bytes()) % self.shard_count as u64) as usize),
            },
            RuleKind::Range => match value {
                Scalar::Int(v) => Some(self.range_bucket(*v)),
                Scalar::Str(_) => None, // range rules shard on integers only
            },
        }
    }

    /// Bucket for a range rule: index = number of boundaries <= v.
    fn range_bucket(&self, v: i64) -> usize {
        self.ranges.partition_point(|b| *b <= v)
    }

    /// Shard indexes covered by `[low, high]` (inclusive); range rules only.
    pub fn range_indexes(&self, low: Option<i64>, high: Option<i64>) -> Option<BTreeSet<usize>> {
        if self.kind != RuleKind::Range {
            return None;
        }
        let lo = low.map(|v| self.range_bucket(v)).unwrap_or(0);
        let hi = high
            .map(|v| self.range_bucket(v))
            .unwrap_or(self.shard_count - 1);
        Some((lo..=hi.min(self.shard_count - 1)).collect())
    }

    /// Concrete targets for one shard-key value.
    pub fn targets_for_value(
        &self,
        value: &Scalar,
        default_phy_db: &str,
    ) -> Result<ShardSet, ProxyError> {
        let index = match self.shard_index(value) {
            Some(i) => i,
            None => return self.full_shard_set(default_phy_db),
        };

        let mut bindings = Bindings::new();
        for col in &self.sharding_columns {
            bindings.insert(col.clone(), vec![value.clone()]);
        }

        let names = self.names_under(&bindings)?;
        let slice = self.slice_for(index);
        let mut out: ShardSet = names
            .into_iter()
            .map(|(db, table)| ShardTarget {
                index,
                slice: slice.clone(),
                db: db.unwrap_or_else(|| default_phy_db.to_string()),
                table,
            })
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// The rule's full shard set (broadcast).
    pub fn full_shard_set(&self, default_phy_db: &str) -> Result<ShardSet, ProxyError> {
        let mut out: ShardSet = self
            .enumeration
            .iter()
            .enumerate()
            .map(|(index, (db, table))| ShardTarget {
                index,
                slice: self.slice_for(index),
                db: db
                    .clone()
                    .unwrap_or_else(|| default_phy_db.to_string()),
                table: table.clone(),
            })
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Targets restricted to the given shard indexes.
    pub fn targets_for_indexes(
        &self,
        indexes: &BTreeSet<usize>,
        default_phy_db: &str,
    ) -> Result<ShardSet, ProxyError> {
        Ok(self
            .full_shard_set(default_phy_db)?
            .into_iter()
            .filter(|t| indexes.contains(&t.index))
            .collect())
    }

    fn slice_for(&self, index: usize) -> String {
        self.slices[index % self.slices.len()].clone()
    }

    /// Evaluate the name expressions under bindings, returning
    /// `(db?, table)` pairs (a `.` inside a flattened name splits the two).
    fn names_under(&self, bindings: &Bindings) -> Result<Vec<(Option<String>, String)>, ProxyError> {
        let tables: Vec<String> = self.table_expr.flat_with(bindings)?.into_iter().collect();
        let dbs: Option<Vec<String>> = match &self.db_expr {
            Some(e) => Some(e.flat_with(bindings)?.into_iter().collect()),
            None => None,
        };

        let mut out = Vec::new();
        for t in &tables {
            let (inline_db, table) = match t.split_once('.') {
                Some((d, t)) => (Some(d.to_string()), t.to_string()),
                None => (None, t.clone()),
            };
            match (&inline_db, &dbs) {
                (Some(d), _) => out.push((Some(d.clone()), table)),
                (None, Some(ds)) => {
                    for d in ds {
                        out.push((Some(d.clone()), table.clone()));
                    }
                }
                (None, None) => out.push((None, table)),
            }
        }
        Ok(out)
    }

    /// Physical names per shard index, in index order.
    fn enumerate_targets(&self) -> Result<Vec<(Option<String>, String)>, ProxyError> {
        let has_vars = !self.table_expr.free_variables().is_empty()
            || self
                .db_expr
                .as_ref()
                .map(|e| !e.free_variables().is_empty())
                .unwrap_or(false);

        if !has_vars {
            let tables = self.table_expr.enumerate()?;
            let dbs = self
                .db_expr
                .as_ref()
                .map(|e| e.enumerate())
                .transpose()?;
            let mut out = Vec::new();
            match dbs {
                None => {
                    for t in tables {
                        match t.split_once('.') {
                            Some((d, t)) => out.push((Some(d.to_string()), t.to_string())),
                            None => out.push((None, t)),
                        }
                    }
                }
                Some(ds) => {
                    // cross product, db-major, mirroring flat()'s pairing
                    for d in &ds {
                        for t in &tables {
                            out.push((Some(d.clone()), t.clone()));
                        }
                    }
                }
            }
            return Ok(out);
        }

        // Variable expressions: enumerate by binding each sharding column to
        // the shard index (the mod-style convention).
        let mut out = Vec::with_capacity(self.shard_count);
        for i in 0..self.shard_count {
            let mut bindings = Bindings::new();
            for col in &self.sharding_columns {
                bindings.insert(col.clone(), vec![Scalar::Int(i as i64)]);
            }
            let names = self.names_under(&bindings)?;
            let (db, table) = names.into_iter().next().ok_or_else(|| {
                ProxyError::Internal(format!(
                    "rule {}.{} produced no physical name for shard {i}",
                    self.db, self.table
                ))
            })?;
            out.push((db, table));
        }
        Ok(out)
    }
}
