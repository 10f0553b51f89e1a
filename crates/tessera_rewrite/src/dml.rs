//! INSERT/UPDATE/DELETE rewriting.

use std::collections::BTreeMap;

use sqlparser::ast::{
    Assignment, AssignmentTarget, Expr, Ident, Insert, SetExpr, Statement, Value as AstValue,
    Values,
};
use tessera_common::error::{ProxyError, ProxyResult, RewriteError, RouteError};
use tessera_route::resolver::{extract_scalar, resolve_where};
use tessera_route::{ShardTarget, TableRule};

use crate::rename::{rename_statement, RenameMap};
use crate::ShardStatement;

fn unsupported(reason: impl Into<String>) -> ProxyError {
    RewriteError::Unsupported(reason.into()).into()
}

/// Insert rewrite output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRewrite {
    pub items: Vec<ShardStatement>,
    /// Rows across all shards (the affected-row sum the client expects).
    pub rows_total: u64,
    /// First sequence-generated id, reported as `last_insert_id`.
    pub first_generated_id: Option<u64>,
}

/// Split a multi-row INSERT by shard. `generated_ids` supplies one sequence
/// value per row when the statement omits the sharding column entirely (the
/// planner fetches them up front).
pub fn rewrite_insert(
    insert: &Insert,
    rule: &TableRule,
    default_phy_db: &str,
    generated_ids: Option<&[u64]>,
) -> ProxyResult<InsertRewrite> {
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| unsupported("INSERT without VALUES into a sharded table"))?;
    let values = match source.body.as_ref() {
        SetExpr::Values(values) => values.clone(),
        _ => return Err(unsupported("INSERT … SELECT into a sharded table")),
    };
    if insert.columns.is_empty() {
        return Err(unsupported(
            "INSERT without a column list into a sharded table",
        ));
    }

    let shard_col_pos = insert
        .columns
        .iter()
        .position(|c| rule.is_sharding_column(&c.value));

    let mut columns = insert.columns.clone();
    let mut first_generated_id = None;
    let mut rows = values.rows.clone();

    if shard_col_pos.is_none() {
        let ids = generated_ids.ok_or_else(|| {
            ProxyError::Route(RouteError::ShardKeyMissing {
                table: rule.table.clone(),
                column: rule.routing_column().to_string(),
            })
        })?;
        if ids.len() != rows.len() {
            return Err(ProxyError::Internal(format!(
                "sequence produced {} ids for {} rows",
                ids.len(),
                rows.len()
            )));
        }
        // materialize the generated column into every row before the split
        columns.push(Ident::new(rule.routing_column().to_string()));
        for (row, id) in rows.iter_mut().zip(ids) {
            row.push(Expr::Value(AstValue::Number(id.to_string(), false)));
        }
        first_generated_id = ids.first().copied();
    }

    let value_pos = shard_col_pos.unwrap_or(columns.len() - 1);

    // group rows by their shard
    let mut per_shard: BTreeMap<ShardTarget, Vec<Vec<Expr>>> = BTreeMap::new();
    for row in rows {
        let scalar = row.get(value_pos).and_then(extract_scalar).ok_or_else(|| {
            ProxyError::Route(RouteError::NonLiteralShardValue {
                column: rule.routing_column().to_string(),
            })
        })?;
        let targets = rule.targets_for_value(&scalar, default_phy_db)?;
        let target = match targets.as_slice() {
            [one] => one.clone(),
            _ => {
                return Err(unsupported(
                    "insert value maps to more than one physical table",
                ))
            }
        };
        per_shard.entry(target).or_default().push(row);
    }

    let rows_total: u64 = per_shard.values().map(|r| r.len() as u64).sum();

    let mut items = Vec::with_capacity(per_shard.len());
    for (target, shard_rows) in per_shard {
        let mut shard_insert = insert.clone();
        shard_insert.columns = columns.clone();
        let mut query = source.as_ref().clone();
        query.body = Box::new(SetExpr::Values(Values {
            explicit_row: values.explicit_row,
            rows: shard_rows,
        }));
        shard_insert.source = Some(Box::new(query));

        let mut map = RenameMap::new();
        map.insert(rule.table.clone(), (target.db.clone(), target.table.clone()));
        let mut stmt = Statement::Insert(shard_insert);
        rename_statement(&mut stmt, &map);
        items.push(ShardStatement {
            target,
            sql: stmt.to_string(),
        });
    }

    Ok(InsertRewrite {
        items,
        rows_total,
        first_generated_id,
    })
}

/// Rewrite an UPDATE for its shard set. The statement must not move rows
/// between shards, so assignments to the sharding columns are rejected.
pub fn rewrite_update(
    stmt: &Statement,
    rule: &TableRule,
    default_phy_db: &str,
) -> ProxyResult<Vec<ShardStatement>> {
    let (assignments, selection) = match stmt {
        Statement::Update {
            assignments,
            selection,
            ..
        } => (assignments, selection),
        _ => return Err(ProxyError::Internal("rewrite_update on a non-UPDATE".into())),
    };

    for a in assignments {
        if assignment_touches(a, rule) {
            return Err(unsupported(
                "updating a sharding column would move the row between shards",
            ));
        }
    }

    let resolution = resolve_where(rule, selection.as_ref(), default_phy_db)?;
    render_per_target(stmt, rule, resolution.targets)
}

/// Rewrite a DELETE for its shard set.
pub fn rewrite_delete(
    stmt: &Statement,
    rule: &TableRule,
    default_phy_db: &str,
) -> ProxyResult<Vec<ShardStatement>> {
    let selection = match stmt {
        Statement::Delete(delete) => &delete.selection,
        _ => return Err(ProxyError::Internal("rewrite_delete on a non-DELETE".into())),
    };

    let resolution = resolve_where(rule, selection.as_ref(), default_phy_db)?;
    render_per_target(stmt, rule, resolution.targets)
}

fn render_per_target(
    stmt: &Statement,
    rule: &TableRule,
    targets: Vec<ShardTarget>,
) -> ProxyResult<Vec<ShardStatement>> {
    let mut items = Vec::with_capacity(targets.len());
    for target in targets {
        let mut map = RenameMap::new();
        map.insert(rule.table.clone(), (target.db.clone(), target.table.clone()));
        let mut shard_stmt = stmt.clone();
        rename_statement(&mut shard_stmt, &map);
        items.push(ShardStatement {
            target,
            sql: shard_stmt.to_string(),
        });
    }
    Ok(items)
}

fn assignment_touches(a: &Assignment, rule: &TableRule) -> bool {
    let names: Vec<&sqlparser::ast::ObjectName> = match &a.target {
        AssignmentTarget::ColumnName(name) => vec![name],
        AssignmentTarget::Tuple(names) => names.iter().collect(),
    };
    names.iter().any(|n| {
        n.0.last()
            .map(|ident| rule.is_sharding_column(&ident.value))
            .unwrap_or(false)
    })
}
