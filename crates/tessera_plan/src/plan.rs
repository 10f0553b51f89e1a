//! Plan data model. A plan is pure data: work items plus a merge recipe.

use tessera_rewrite::{AggSpec, LimitSpec, MergePlan, SortKey};

/// One sub-query bound for one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub slice: String,
    /// Physical database the connection should default to.
    pub db: String,
    pub sql: String,
    /// Shard index; transactions execute items in this order.
    pub shard_index: usize,
}

/// How the merger reassembles per-shard results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRecipe {
    /// Exactly one work item; the result is forwarded untouched.
    Passthrough,
    /// Union rows in arrival order; sum affected rows; OR status flags.
    Concat {
        limit: Option<LimitSpec>,
        distinct: bool,
        visible: Option<usize>,
    },
    /// K-way merge over sorted shard streams.
    OrderedMerge {
        keys: Vec<SortKey>,
        distinct: bool,
        visible: Option<usize>,
    },
    /// Ordered merge, then skip `offset`, take `count`.
    TopN {
        limit: LimitSpec,
        keys: Vec<SortKey>,
        distinct: bool,
        visible: Option<usize>,
    },
    /// Group and reduce aggregate partials.
    Aggregate {
        group_keys: Vec<usize>,
        aggs: Vec<AggSpec>,
        avg_fixups: Vec<(usize, usize)>,
        sort_keys: Vec<SortKey>,
        limit: Option<LimitSpec>,
        visible: Option<usize>,
    },
}

impl From<MergePlan> for MergeRecipe {
    fn from(m: MergePlan) -> Self {
        if m.is_aggregate {
            return MergeRecipe::Aggregate {
                group_keys: m.group_keys,
                aggs: m.aggregates,
                avg_fixups: m.avg_fixups,
                sort_keys: m.sort_keys,
                limit: m.limit,
                visible: m.visible_columns,
            };
        }
        if !m.sort_keys.is_empty() {
            return match m.limit {
                Some(limit) => MergeRecipe::TopN {
                    limit,
                    keys: m.sort_keys,
                    distinct: m.distinct,
                    visible: m.visible_columns,
                },
                None => MergeRecipe::OrderedMerge {
                    keys: m.sort_keys,
                    distinct: m.distinct,
                    visible: m.visible_columns,
                },
            };
        }
        MergeRecipe::Concat {
            limit: m.limit,
            distinct: m.distinct,
            visible: m.visible_columns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Read,
    Write,
}

/// The unit the session executor drives to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub items: Vec<WorkItem>,
    pub recipe: MergeRecipe,
    pub kind: PlanKind,
    /// Sequence-generated id to report as `last_insert_id`.
    pub generated_id: Option<u64>,
    /// Stream rows shard-by-shard instead of buffering.
    pub streaming: bool,
}

impl Plan {
    pub fn single(item: WorkItem, kind: PlanKind) -> Self {
        Self {
            items: vec![item],
            recipe: MergeRecipe::Passthrough,
            kind,
            generated_id: None,
            streaming: false,
        }
    }

    pub fn is_single_shard(&self) -> bool {
        self.items.len() <= 1
    }

    /// Distinct slices this plan touches, in item order.
    pub fn slices(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for item in &self.items {
            if !out.contains(&item.slice.as_str()) {
                out.push(&item.slice);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_rewrite::AggKind;

    #[test]
    fn recipe_from_plain_topn() {
        let m = MergePlan {
            sort_keys: vec![SortKey { index: 0, asc: true }],
            limit: Some(LimitSpec { offset: 5, count: 3 }),
            ..Default::default()
        };
        assert!(matches!(MergeRecipe::from(m), MergeRecipe::TopN { .. }));
    }

    #[test]
    fn recipe_from_order_only() {
        let m = MergePlan {
            sort_keys: vec![SortKey { index: 1, asc: false }],
            ..Default::default()
        };
        assert!(matches!(MergeRecipe::from(m), MergeRecipe::OrderedMerge { .. }));
    }

    #[test]
    fn recipe_from_aggregate_wins() {
        let m = MergePlan {
            is_aggregate: true,
            aggregates: vec![AggSpec { kind: AggKind::Sum, index: 0 }],
            sort_keys: vec![SortKey { index: 0, asc: true }],
            ..Default::default()
        };
        assert!(matches!(MergeRecipe::from(m), MergeRecipe::Aggregate { .. }));
    }

    #[test]
    fn recipe_default_is_concat() {
        assert!(matches!(
            MergeRecipe::from(MergePlan::default()),
            MergeRecipe::Concat { limit: None, distinct: false, visible: None }
        ));
    }

    #[test]
    fn plan_slices_dedup_in_order() {
        let mk = |slice: &str, idx: usize| WorkItem {
            slice: slice.into(),
            db: "d".into(),
            sql: "SELECT 1".into(),
            shard_index: idx,
        };
        let plan = Plan {
            items: vec![mk("s1", 0), mk("s0", 1), mk("s1", 2)],
            recipe: MergeRecipe::Concat { limit: None, distinct: false, visible: None },
            kind: PlanKind::Read,
            generated_id: None,
            streaming: false,
        };
        assert_eq!(plan.slices(), vec!["s1", "s0"]);
    }
}
