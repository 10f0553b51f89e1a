//! SELECT rewriting: per-shard statements plus the merge plan.

use std::collections::BTreeSet;
use std::sync::Arc;

use sqlparser::ast::{
    Distinct, Expr, Function, FunctionArguments, GroupByExpr, Ident, ObjectName, Query, Select,
    SelectItem, SetExpr, Statement, Value as AstValue,
};
use tessera_common::error::{ProxyError, ProxyResult, RewriteError};
use tessera_route::{ShardSetResolution, ShardTarget, TableRule};

use crate::rename::{rename_statement, RenameMap};
use crate::{AggKind, AggSpec, LimitSpec, MergePlan, ShardStatement, SortKey};

/// One sharded table referenced by the statement, with its resolved shard set.
pub struct TableBinding {
    /// Logical table name, lowercased.
    pub table: String,
    pub rule: Arc<TableRule>,
    pub resolution: ShardSetResolution,
}

/// Rewrite output: per-shard SQL plus merge instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRewrite {
    pub items: Vec<ShardStatement>,
    pub merge: MergePlan,
}

fn unsupported(reason: impl Into<String>) -> ProxyError {
    RewriteError::Unsupported(reason.into()).into()
}

/// Rewrite a SELECT for its shard set.
pub fn rewrite_select(
    query: &Query,
    bindings: &[TableBinding],
    default_phy_db: &str,
    max_merge_limit: u64,
) -> ProxyResult<SelectRewrite> {
    let work_targets = align_targets(bindings, default_phy_db)?;

    if work_targets.is_empty() {
        return Ok(SelectRewrite {
            items: vec![],
            merge: MergePlan::passthrough(),
        });
    }

    if work_targets.len() == 1 {
        let (target, map) = &work_targets[0];
        let mut stmt = Statement::Query(Box::new(query.clone()));
        rename_statement(&mut stmt, map);
        return Ok(SelectRewrite {
            items: vec![ShardStatement {
                target: target.clone(),
                sql: stmt.to_string(),
            }],
            merge: MergePlan::passthrough(),
        });
    }

    // ── multi-shard: transform a template once, then clone per shard ──
    let mut work = query.clone();
    if work.with.is_some() {
        return Err(unsupported("WITH (common table expressions) across shards"));
    }
    let select = match work.body.as_mut() {
        SetExpr::Select(select) => select.as_mut(),
        _ => return Err(unsupported("set operations across shards")),
    };

    let merge = analyze_and_transform(select, &mut work.limit, &mut work.offset, &mut work.order_by, max_merge_limit)?;

    let mut items = Vec::with_capacity(work_targets.len());
    for (target, map) in &work_targets {
        let mut stmt = Statement::Query(Box::new(work.clone()));
        rename_statement(&mut stmt, map);
        items.push(ShardStatement {
            target: target.clone(),
            sql: stmt.to_string(),
        });
    }

    Ok(SelectRewrite { items, merge })
}

/// Align every sharded table in the statement onto one work-item list.
///
/// A single sharded table drives the shard set directly. With several, the
/// statement's shard indexes are the intersection when the rules share a
/// sharding column, else the union (broadcast); every table must then carve
/// into the same number of shards and agree on the slice per index.
fn align_targets(
    bindings: &[TableBinding],
    default_phy_db: &str,
) -> ProxyResult<Vec<(ShardTarget, RenameMap)>> {
    match bindings {
        [] => Err(ProxyError::Internal(
            "rewrite_select called with no table bindings".into(),
        )),
        [only] => Ok(only
            .resolution
            .targets
            .iter()
            .map(|t| {
                let mut map = RenameMap::new();
                map.insert(only.table.clone(), (t.db.clone(), t.table.clone()));
                (t.clone(), map)
            })
            .collect()),
        many => {
            let count = many[0].rule.shard_count();
            if many.iter().any(|b| b.rule.shard_count() != count) {
                return Err(unsupported(
                    "join of tables with different shard counts",
                ));
            }

            let shares_column = many.iter().skip(1).all(|b| {
                many[0]
                    .rule
                    .sharding_columns
                    .iter()
                    .any(|c| b.rule.is_sharding_column(c))
            });

            let index_sets: Vec<BTreeSet<usize>> = many
                .iter()
                .map(|b| b.resolution.targets.iter().map(|t| t.index).collect())
                .collect();

            let indexes: BTreeSet<usize> = if shares_column {
                index_sets
                    .iter()
                    .skip(1)
                    .fold(index_sets[0].clone(), |acc, s| {
                        acc.intersection(s).copied().collect()
                    })
            } else {
                index_sets.into_iter().flatten().collect()
            };

            let mut out = Vec::with_capacity(indexes.len());
            for index in indexes {
                let mut map = RenameMap::new();
                let mut anchor: Option<ShardTarget> = None;
                for b in many {
                    let wanted = BTreeSet::from([index]);
                    let targets = b.rule.targets_for_indexes(&wanted, default_phy_db)?;
                    let t = targets.into_iter().next().ok_or_else(|| {
                        unsupported(format!("table {} has no shard {index}", b.table))
                    })?;
                    match &anchor {
                        None => anchor = Some(t.clone()),
                        Some(a) if a.slice != t.slice => {
                            return Err(unsupported(
                                "joined tables land on different slices for one shard",
                            ))
                        }
                        Some(_) => {}
                    }
                    map.insert(b.table.clone(), (t.db, t.table));
                }
                out.push((anchor.expect("at least one binding"), map));
            }
            Ok(out)
        }
    }
}

/// Shared multi-shard transform of the template SELECT.
#[allow(clippy::too_many_lines)]
fn analyze_and_transform(
    select: &mut Select,
    limit: &mut Option<Expr>,
    offset: &mut Option<sqlparser::ast::Offset>,
    order_by: &mut Option<sqlparser::ast::OrderBy>,
    max_merge_limit: u64,
) -> ProxyResult<MergePlan> {
    let visible = select.projection.len();
    let has_star = select
        .projection
        .iter()
        .any(|i| matches!(i, SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)));

    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => return Err(unsupported("DISTINCT ON across shards")),
    };

    // aggregate census
    let mut has_aggregate = false;
    for item in &select.projection {
        if let Some((expr, _)) = projection_expr(item) {
            match expr {
                Expr::Function(f) => {
                    if f.over.is_some() {
                        return Err(unsupported("window functions across shards"));
                    }
                    if agg_kind(f).is_some() {
                        has_aggregate = true;
                        continue;
                    }
                    if contains_aggregate(expr) {
                        return Err(unsupported(
                            "aggregate inside an expression across shards",
                        ));
                    }
                }
                other => {
                    if contains_aggregate(other) {
                        return Err(unsupported(
                            "aggregate inside an expression across shards",
                        ));
                    }
                }
            }
        }
    }

    let group_exprs: Vec<Expr> = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs.clone(),
        _ => return Err(unsupported("GROUP BY ALL across shards")),
    };

    let limit_spec = extract_limit(limit.as_ref(), offset.as_ref())?;
    if let Some(spec) = &limit_spec {
        let folded = spec
            .offset
            .checked_add(spec.count)
            .filter(|v| *v <= max_merge_limit)
            .ok_or(RewriteError::LimitTooLarge {
                offset: spec.offset,
                count: spec.count,
                max: max_merge_limit,
            })?;
        // each shard returns the full merge window; the merger trims
        *limit = Some(number_expr(folded));
        *offset = None;
    }

    if has_aggregate || !group_exprs.is_empty() {
        if has_star {
            return Err(unsupported("star projection with aggregation across shards"));
        }
        if select.having.is_some() {
            return Err(unsupported("HAVING across shards"));
        }
        if distinct {
            return Err(unsupported("DISTINCT with aggregation across shards"));
        }

        let original_projection = select.projection.clone();
        let mut aggregates = Vec::new();
        let mut avg_fixups = Vec::new();
        let mut hidden: Vec<SelectItem> = Vec::new();

        for i in 0..visible {
            let (mut expr, mut alias) = match select.projection[i].clone() {
                SelectItem::UnnamedExpr(e) => (e, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias)),
                _ => continue,
            };

            if let Expr::Function(f) = &mut expr {
                if agg_kind(f).is_some() || is_avg(f) {
                    if has_distinct_arg(f) {
                        return Err(unsupported("DISTINCT aggregates across shards"));
                    }
                }
                if let Some(kind) = agg_kind(f) {
                    aggregates.push(AggSpec { kind, index: i });
                } else if is_avg(f) {
                    // AVG(x) → SUM(x) … plus a hidden COUNT(x); merger divides
                    let display = f.to_string();
                    let mut count_fn = f.clone();
                    count_fn.name = ObjectName(vec![Ident::new("COUNT")]);
                    f.name = ObjectName(vec![Ident::new("SUM")]);
                    if alias.is_none() {
                        // the client still sees the column named AVG(x)
                        alias = Some(Ident::with_quote('`', display));
                    }
                    let count_index = visible + hidden.len();
                    hidden.push(SelectItem::ExprWithAlias {
                        expr: Expr::Function(count_fn),
                        alias: Ident::new(format!("__avg_cnt_{i}")),
                    });
                    aggregates.push(AggSpec {
                        kind: AggKind::Sum,
                        index: i,
                    });
                    aggregates.push(AggSpec {
                        kind: AggKind::Count,
                        index: count_index,
                    });
                    avg_fixups.push((i, count_index));
                }
            }

            select.projection[i] = match alias {
                Some(alias) => SelectItem::ExprWithAlias { expr, alias },
                None => SelectItem::UnnamedExpr(expr),
            };
        }

        // group keys must be readable by the merger
        let mut group_keys = Vec::with_capacity(group_exprs.len());
        for gexpr in &group_exprs {
            match find_projection_index(&original_projection, gexpr, visible)? {
                Some(idx) => group_keys.push(idx),
                None => {
                    let idx = visible + hidden.len();
                    hidden.push(SelectItem::ExprWithAlias {
                        expr: gexpr.clone(),
                        alias: Ident::new(format!("__group_{idx}")),
                    });
                    group_keys.push(idx);
                }
            }
        }

        // post-merge ordering must land on a merged column
        let mut sort_keys = Vec::new();
        if let Some(ob) = order_by.as_ref() {
            for key in &ob.exprs {
                let idx = find_projection_index(&original_projection, &key.expr, visible)?
                    .ok_or_else(|| {
                        unsupported("ORDER BY key not in the aggregate projection")
                    })?;
                sort_keys.push(SortKey {
                    index: idx,
                    asc: key.asc.unwrap_or(true),
                });
            }
        }

        select.projection.extend(hidden);
        // partials must be complete: shards neither sort nor trim
        *order_by = None;
        *limit = None;
        *offset = None;

        return Ok(MergePlan {
            sort_keys,
            limit: limit_spec,
            group_keys,
            aggregates,
            avg_fixups,
            distinct: false,
            visible_columns: Some(visible),
            is_aggregate: true,
        });
    }

    // ── plain select (no aggregation) ──
    let mut sort_keys = Vec::new();
    let mut hidden: Vec<SelectItem> = Vec::new();
    if let Some(ob) = order_by.as_ref() {
        for key in &ob.exprs {
            let asc = key.asc.unwrap_or(true);
            match find_projection_index(&select.projection, &key.expr, visible)? {
                Some(idx) => sort_keys.push(SortKey { index: idx, asc }),
                None => {
                    if has_star {
                        return Err(unsupported(
                            "ORDER BY key that needs lifting next to a star projection",
                        ));
                    }
                    let idx = visible + hidden.len();
                    hidden.push(SelectItem::ExprWithAlias {
                        expr: key.expr.clone(),
                        alias: Ident::new(format!("__sort_{idx}")),
                    });
                    sort_keys.push(SortKey { index: idx, asc });
                }
            }
        }
    }
    let lifted = !hidden.is_empty();
    select.projection.extend(hidden);

    if distinct && has_star {
        return Err(unsupported("DISTINCT over a star projection across shards"));
    }

    Ok(MergePlan {
        sort_keys,
        limit: limit_spec,
        group_keys: vec![],
        aggregates: vec![],
        avg_fixups: vec![],
        distinct,
        visible_columns: if lifted { Some(visible) } else { None },
        is_aggregate: false,
    })
}

fn projection_expr(item: &SelectItem) -> Option<(&Expr, Option<&Ident>)> {
    match item {
        SelectItem::UnnamedExpr(e) => Some((e, None)),
        SelectItem::ExprWithAlias { expr, alias } => Some((expr, Some(alias))),
        _ => None,
    }
}

const AGG_NAMES: [&str; 5] = ["COUNT", "SUM", "MIN", "MAX", "AVG"];

fn function_name(f: &Function) -> String {
    f.name
        .0
        .last()
        .map(|i| i.value.to_uppercase())
        .unwrap_or_default()
}

fn is_avg(f: &Function) -> bool {
    function_name(f) == "AVG"
}

/// The merge kind for a shard-local aggregate; AVG reports `None` here and is
/// split into SUM + COUNT by the caller.
fn agg_kind(f: &Function) -> Option<AggKind> {
    match function_name(f).as_str() {
        "COUNT" => Some(AggKind::Count),
        "SUM" => Some(AggKind::Sum),
        "MIN" => Some(AggKind::Min),
        "MAX" => Some(AggKind::Max),
        _ => None,
    }
}

fn is_aggregate_fn(f: &Function) -> bool {
    AGG_NAMES.contains(&function_name(f).as_str())
}

fn has_distinct_arg(f: &Function) -> bool {
    match &f.args {
        FunctionArguments::List(list) => list.duplicate_treatment.is_some(),
        _ => false,
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    struct Finder(bool);
    impl sqlparser::ast::Visitor for Finder {
        type Break = ();
        fn pre_visit_expr(&mut self, expr: &Expr) -> std::ops::ControlFlow<()> {
            if let Expr::Function(f) = expr {
                if is_aggregate_fn(f) {
                    self.0 = true;
                    return std::ops::ControlFlow::Break(());
                }
            }
            std::ops::ControlFlow::Continue(())
        }
    }
    let mut finder = Finder(false);
    let _ = sqlparser::ast::Visit::visit(expr, &mut finder);
    finder.0
}

/// Resolve an ORDER BY / GROUP BY key to a projection index: positional
/// number, alias, column name, or whole-expression match.
fn find_projection_index(
    projection: &[SelectItem],
    key: &Expr,
    visible: usize,
) -> ProxyResult<Option<usize>> {
    if let Expr::Value(AstValue::Number(text, _)) = key {
        let n: usize = text
            .parse()
            .map_err(|_| unsupported(format!("positional key {text}")))?;
        if n == 0 || n > visible {
            return Err(unsupported(format!("positional key {n} out of range")));
        }
        return Ok(Some(n - 1));
    }

    let key_name = match key {
        Expr::Identifier(id) => Some(id.value.as_str()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.as_str()),
        _ => None,
    };

    for (i, item) in projection.iter().enumerate() {
        let Some((expr, alias)) = projection_expr(item) else {
            continue;
        };
        if expr == key {
            return Ok(Some(i));
        }
        if let (Some(name), Some(alias)) = (key_name, alias) {
            if alias.value.eq_ignore_ascii_case(name) {
                return Ok(Some(i));
            }
        }
        if let (Some(name), None) = (key_name, alias) {
            let item_name = match expr {
                Expr::Identifier(id) => Some(id.value.as_str()),
                Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.as_str()),
                _ => None,
            };
            if item_name.map(|n| n.eq_ignore_ascii_case(name)).unwrap_or(false) {
                return Ok(Some(i));
            }
        }
    }
    Ok(None)
}

fn extract_limit(
    limit: Option<&Expr>,
    offset: Option<&sqlparser::ast::Offset>,
) -> ProxyResult<Option<LimitSpec>> {
    let Some(limit) = limit else {
        return Ok(None);
    };
    let count = literal_u64(limit)
        .ok_or_else(|| unsupported("non-literal LIMIT across shards"))?;
    let offset = match offset {
        Some(o) => literal_u64(&o.value)
            .ok_or_else(|| unsupported("non-literal OFFSET across shards"))?,
        None => 0,
    };
    Ok(Some(LimitSpec { offset, count }))
}

fn literal_u64(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(AstValue::Number(text, _)) => text.parse().ok(),
        _ => None,
    }
}

fn number_expr(v: u64) -> Expr {
    Expr::Value(AstValue::Number(v.to_string(), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;
    use tessera_common::config::{RuleKind, TableRuleConfig};
    use tessera_route::resolver::resolve_where;

    fn rule4() -> Arc<TableRule> {
        Arc::new(
            TableRule::compile(&TableRuleConfig {
                db: "shop".into(),
                table: "orders".into(),
                sharding_columns: vec!["user_id".into()],
                db_expr: None,
                table_expr: "orders_${0..3}".into(),
                slices: vec!["s0".into(), "s1".into()],
                kind: RuleKind::Hash,
                shard_count: None,
                ranges: vec![],
                sequence: None,
            })
            .unwrap(),
        )
    }

    fn parse_query(sql: &str) -> Box<Query> {
        let mut stmts = Parser::parse_sql(&MySqlDialect {}, sql).unwrap();
        match stmts.remove(0) {
            Statement::Query(q) => q,
            other => panic!("not a query: {other:?}"),
        }
    }

    fn bind(sql: &str) -> (Box<Query>, Vec<TableBinding>) {
        let query = parse_query(sql);
        let rule = rule4();
        let selection = match query.body.as_ref() {
            SetExpr::Select(s) => s.selection.clone(),
            _ => None,
        };
        let resolution = resolve_where(&rule, selection.as_ref(), "shop_phy").unwrap();
        let binding = TableBinding {
            table: "orders".into(),
            rule,
            resolution,
        };
        (query, vec![binding])
    }

    fn rewrite(sql: &str) -> SelectRewrite {
        let (query, bindings) = bind(sql);
        rewrite_select(&query, &bindings, "shop_phy", 1 << 20).unwrap()
    }

    // ── single shard passthrough ────────────────────────────────────────

    #[test]
    fn single_shard_is_passthrough() {
        let rw = rewrite("SELECT id, name FROM orders WHERE user_id = 6 LIMIT 5, 3");
        assert_eq!(rw.items.len(), 1);
        assert_eq!(rw.merge, MergePlan::passthrough());
        // limit untouched (renderer normalizes the comma form), table renamed
        assert!(rw.items[0].sql.contains("shop_phy.orders_2 AS orders"));
        assert!(rw.items[0].sql.contains("LIMIT 3"));
        assert!(rw.items[0].sql.contains("OFFSET 5"));
    }

    // ── top-n (scenario: IN over two shards with LIMIT 5,3) ─────────────

    #[test]
    fn topn_rewrites_limit_and_keeps_order() {
        let rw = rewrite(
            "SELECT id, name FROM orders WHERE user_id IN (1, 2) ORDER BY id LIMIT 5, 3",
        );
        assert_eq!(rw.items.len(), 2);
        for item in &rw.items {
            assert!(item.sql.contains("LIMIT 8"), "sql: {}", item.sql);
            assert!(!item.sql.contains("OFFSET"));
            assert!(item.sql.contains("ORDER BY id"));
        }
        assert_eq!(rw.items[0].target.table, "orders_1");
        assert_eq!(rw.items[1].target.table, "orders_2");
        assert_eq!(
            rw.merge.limit,
            Some(LimitSpec { offset: 5, count: 3 })
        );
        assert_eq!(rw.merge.sort_keys, vec![SortKey { index: 0, asc: true }]);
        assert_eq!(rw.merge.visible_columns, None);
    }

    #[test]
    fn limit_overflow_is_rejected() {
        let (query, bindings) =
            bind("SELECT id FROM orders ORDER BY id LIMIT 100, 100");
        let err = rewrite_select(&query, &bindings, "d", 150).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Rewrite(RewriteError::LimitTooLarge { .. })
        ));
    }

    // ── order-by key lifting ────────────────────────────────────────────

    #[test]
    fn missing_sort_key_is_lifted_and_hidden() {
        let rw = rewrite("SELECT name FROM orders ORDER BY id DESC");
        assert_eq!(rw.items.len(), 4);
        assert!(rw.items[0].sql.contains("id AS __sort_1"));
        assert_eq!(rw.merge.sort_keys, vec![SortKey { index: 1, asc: false }]);
        assert_eq!(rw.merge.visible_columns, Some(1));
    }

    #[test]
    fn aliased_sort_key_is_found() {
        let rw = rewrite("SELECT id AS order_id FROM orders ORDER BY order_id");
        assert_eq!(rw.merge.sort_keys, vec![SortKey { index: 0, asc: true }]);
        assert_eq!(rw.merge.visible_columns, None);
    }

    #[test]
    fn positional_sort_key() {
        let rw = rewrite("SELECT id, name FROM orders ORDER BY 2 DESC");
        assert_eq!(rw.merge.sort_keys, vec![SortKey { index: 1, asc: false }]);
    }

    // ── aggregates ──────────────────────────────────────────────────────

    #[test]
    fn avg_splits_into_sum_and_count() {
        let rw = rewrite("SELECT AVG(age) FROM orders");
        assert_eq!(rw.items.len(), 4);
        let sql = &rw.items[0].sql;
        assert!(sql.contains("SUM(age) AS `AVG(age)`"), "sql: {sql}");
        assert!(sql.contains("COUNT(age) AS __avg_cnt_0"), "sql: {sql}");
        assert!(rw.merge.is_aggregate);
        assert_eq!(rw.merge.avg_fixups, vec![(0, 1)]);
        assert_eq!(rw.merge.visible_columns, Some(1));
    }

    #[test]
    fn count_sum_min_max_stay_shard_local() {
        let rw = rewrite("SELECT COUNT(*), SUM(total), MIN(id), MAX(id) FROM orders");
        let sql = &rw.items[0].sql;
        assert!(sql.contains("COUNT(*)"));
        assert_eq!(
            rw.merge.aggregates,
            vec![
                AggSpec { kind: AggKind::Count, index: 0 },
                AggSpec { kind: AggKind::Sum, index: 1 },
                AggSpec { kind: AggKind::Min, index: 2 },
                AggSpec { kind: AggKind::Max, index: 3 },
            ]
        );
    }

    #[test]
    fn group_by_key_lifted_when_missing() {
        let rw = rewrite("SELECT COUNT(*) FROM orders GROUP BY status");
        let sql = &rw.items[0].sql;
        assert!(sql.contains("status AS __group_1"), "sql: {sql}");
        assert_eq!(rw.merge.group_keys, vec![1]);
        // per-shard GROUP BY survives; ordering/limits do not
        assert!(sql.contains("GROUP BY status"));
    }

    #[test]
    fn group_by_in_projection_found() {
        let rw = rewrite("SELECT status, COUNT(*) FROM orders GROUP BY status");
        assert_eq!(rw.merge.group_keys, vec![0]);
        assert_eq!(rw.merge.aggregates, vec![AggSpec { kind: AggKind::Count, index: 1 }]);
    }

    #[test]
    fn aggregate_limits_move_to_merger() {
        let rw = rewrite("SELECT status, COUNT(*) FROM orders GROUP BY status ORDER BY status LIMIT 10");
        let sql = &rw.items[0].sql;
        assert!(!sql.contains("LIMIT"), "sql: {sql}");
        assert!(!sql.contains("ORDER BY"), "sql: {sql}");
        assert_eq!(rw.merge.limit, Some(LimitSpec { offset: 0, count: 10 }));
        assert_eq!(rw.merge.sort_keys, vec![SortKey { index: 0, asc: true }]);
    }

    // ── distinct ────────────────────────────────────────────────────────

    #[test]
    fn distinct_dedups_post_merge() {
        let rw = rewrite("SELECT DISTINCT status FROM orders");
        assert!(rw.merge.distinct);
        assert!(rw.items[0].sql.contains("SELECT DISTINCT"));
    }

    // ── unsupported shapes ──────────────────────────────────────────────

    #[test]
    fn unsupported_shapes_error() {
        for sql in [
            "SELECT * FROM orders ORDER BY missing_col",
            "SELECT COUNT(*) + 1 FROM orders",
            "SELECT COUNT(DISTINCT id) FROM orders",
            "SELECT COUNT(*) FROM orders HAVING COUNT(*) > 1",
            "SELECT * , COUNT(*) FROM orders",
        ] {
            let (query, bindings) = bind(sql);
            assert!(
                rewrite_select(&query, &bindings, "d", 1 << 20).is_err(),
                "expected rejection: {sql}"
            );
        }
    }

    #[test]
    fn star_without_surgery_is_fine() {
        let rw = rewrite("SELECT * FROM orders");
        assert_eq!(rw.items.len(), 4);
        assert_eq!(rw.merge, MergePlan::passthrough());
    }

    #[test]
    fn empty_shard_set_yields_no_items() {
        let rw = rewrite("SELECT id FROM orders WHERE user_id = 1 AND user_id = 2");
        assert!(rw.items.is_empty());
    }
}
