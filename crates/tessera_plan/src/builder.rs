//! Plan construction from a parsed statement.

use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations, FromTable, Insert, ObjectName, Query, SetExpr, Statement, TableFactor,
};
use tessera_common::error::{PlanError, ProxyResult};
use tessera_route::resolver::resolve_where;
use tessera_route::{Router, SequenceRegistry};
use tessera_rewrite::{
    rewrite_delete, rewrite_insert, rewrite_select, rewrite_update, ShardStatement, TableBinding,
};

use crate::plan::{MergeRecipe, Plan, PlanKind, WorkItem};

/// Everything the builder needs from the namespace.
pub struct PlanContext<'a> {
    pub router: &'a Router,
    pub sequences: &'a SequenceRegistry,
    pub current_db: &'a str,
    /// Default physical database for `current_db`.
    pub default_phy_db: &'a str,
    pub default_slice: &'a str,
    pub max_merge_limit: u64,
}

/// Build a plan for a routable statement. Control statements (SET, USE,
/// BEGIN…) belong to the executor fast path, not here.
pub async fn build_plan(stmt: &Statement, sql: &str, ctx: &PlanContext<'_>) -> ProxyResult<Plan> {
    match stmt {
        Statement::Query(query) => build_select(query, sql, ctx),
        Statement::Insert(insert) => build_insert(insert, sql, ctx).await,
        Statement::Update { .. } => build_dml(stmt, sql, ctx, update_table(stmt)),
        Statement::Delete(_) => build_dml(stmt, sql, ctx, delete_table(stmt)),
        other => Err(PlanError::Unsupported(format!(
            "statement is not routable: {}",
            statement_kind(other)
        ))
        .into()),
    }
}

fn statement_kind(stmt: &Statement) -> &'static str {
    match stmt {
        Statement::Query(_) => "query",
        Statement::Insert(_) => "insert",
        Statement::Update { .. } => "update",
        Statement::Delete(_) => "delete",
        Statement::StartTransaction { .. } => "begin",
        Statement::Commit { .. } => "commit",
        Statement::Rollback { .. } => "rollback",
        _ => "other",
    }
}

fn passthrough_item(sql: &str, ctx: &PlanContext<'_>) -> WorkItem {
    WorkItem {
        slice: ctx.default_slice.to_string(),
        db: ctx.default_phy_db.to_string(),
        sql: sql.to_string(),
        shard_index: 0,
    }
}

fn work_items(items: Vec<ShardStatement>) -> Vec<WorkItem> {
    items
        .into_iter()
        .map(|s| WorkItem {
            slice: s.target.slice,
            db: s.target.db,
            sql: s.sql,
            shard_index: s.target.index,
        })
        .collect()
}

/// Tables referenced anywhere in the statement, as `(qualifier, table)`
/// lowercased, first occurrence first.
fn referenced_tables(stmt: &Statement) -> Vec<(Option<String>, String)> {
    let mut out: Vec<(Option<String>, String)> = Vec::new();
    let _ = visit_relations(stmt, |name: &ObjectName| {
        let table = name
            .0
            .last()
            .map(|i| i.value.to_lowercase())
            .unwrap_or_default();
        let db = if name.0.len() > 1 {
            Some(name.0[0].value.to_lowercase())
        } else {
            None
        };
        let pair = (db, table);
        if !out.contains(&pair) {
            out.push(pair);
        }
        ControlFlow::<()>::Continue(())
    });
    out
}

fn build_select(query: &Query, sql: &str, ctx: &PlanContext<'_>) -> ProxyResult<Plan> {
    let stmt = Statement::Query(Box::new(query.clone()));
    let selection = match query.body.as_ref() {
        SetExpr::Select(select) => select.selection.clone(),
        _ => None,
    };

    let mut bindings = Vec::new();
    for (qualifier, table) in referenced_tables(&stmt) {
        let db = qualifier.as_deref().unwrap_or(ctx.current_db);
        if let Some(rule) = ctx.router.rule(db, &table).as_sharded() {
            let resolution = resolve_where(rule, selection.as_ref(), ctx.default_phy_db)?;
            bindings.push(TableBinding {
                table,
                rule: rule.clone(),
                resolution,
            });
        }
    }

    if bindings.is_empty() {
        return Ok(Plan::single(passthrough_item(sql, ctx), PlanKind::Read));
    }

    let rw = rewrite_select(query, &bindings, ctx.default_phy_db, ctx.max_merge_limit)?;
    Ok(Plan {
        items: work_items(rw.items),
        recipe: rw.merge.into(),
        kind: PlanKind::Read,
        generated_id: None,
        streaming: false,
    })
}

async fn build_insert(insert: &Insert, sql: &str, ctx: &PlanContext<'_>) -> ProxyResult<Plan> {
    let table = insert
        .table_name
        .0
        .last()
        .map(|i| i.value.to_lowercase())
        .unwrap_or_default();
    let db = if insert.table_name.0.len() > 1 {
        insert.table_name.0[0].value.to_lowercase()
    } else {
        ctx.current_db.to_string()
    };

    let Some(rule) = ctx.router.rule(&db, &table).as_sharded().cloned() else {
        return Ok(Plan::single(passthrough_item(sql, ctx), PlanKind::Write));
    };

    let has_shard_col = insert
        .columns
        .iter()
        .any(|c| rule.is_sharding_column(&c.value));

    let generated: Option<Vec<u64>> = if !has_shard_col {
        match &rule.sequence {
            Some(seq_name) => {
                let rows = match insert.source.as_deref().map(|q| q.body.as_ref()) {
                    Some(SetExpr::Values(values)) => values.rows.len(),
                    _ => 0,
                };
                let provider = ctx.sequences.get(seq_name)?;
                let mut ids = Vec::with_capacity(rows);
                for _ in 0..rows {
                    ids.push(provider.next_id(&rule.db, &rule.table).await?);
                }
                Some(ids)
            }
            None => None,
        }
    } else {
        None
    };

    let rw = rewrite_insert(insert, &rule, ctx.default_phy_db, generated.as_deref())?;
    Ok(Plan {
        items: work_items(rw.items),
        recipe: MergeRecipe::Concat {
            limit: None,
            distinct: false,
            visible: None,
        },
        kind: PlanKind::Write,
        generated_id: rw.first_generated_id,
        streaming: false,
    })
}

fn update_table(stmt: &Statement) -> Option<(Option<String>, String)> {
    match stmt {
        Statement::Update { table, .. } => factor_name(&table.relation),
        _ => None,
    }
}

fn delete_table(stmt: &Statement) -> Option<(Option<String>, String)> {
    match stmt {
        Statement::Delete(delete) => {
            let twj = match &delete.from {
                FromTable::WithFromKeyword(v) | FromTable::WithoutKeyword(v) => v.first()?,
            };
            factor_name(&twj.relation)
        }
        _ => None,
    }
}

fn factor_name(factor: &TableFactor) -> Option<(Option<String>, String)> {
    match factor {
        TableFactor::Table { name, .. } => {
            let table = name.0.last()?.value.to_lowercase();
            let db = if name.0.len() > 1 {
                Some(name.0[0].value.to_lowercase())
            } else {
                None
            };
            Some((db, table))
        }
        _ => None,
    }
}

fn build_dml(
    stmt: &Statement,
    sql: &str,
    ctx: &PlanContext<'_>,
    table: Option<(Option<String>, String)>,
) -> ProxyResult<Plan> {
    let Some((qualifier, table)) = table else {
        return Err(PlanError::Unsupported("DML without a plain table target".into()).into());
    };
    let db = qualifier.unwrap_or_else(|| ctx.current_db.to_string());

    let Some(rule) = ctx.router.rule(&db, &table).as_sharded().cloned() else {
        return Ok(Plan::single(passthrough_item(sql, ctx), PlanKind::Write));
    };

    let items = match stmt {
        Statement::Update { .. } => rewrite_update(stmt, &rule, ctx.default_phy_db)?,
        _ => rewrite_delete(stmt, &rule, ctx.default_phy_db)?,
    };
    Ok(Plan {
        items: work_items(items),
        recipe: MergeRecipe::Concat {
            limit: None,
            distinct: false,
            visible: None,
        },
        kind: PlanKind::Write,
        generated_id: None,
        streaming: false,
    })
}
