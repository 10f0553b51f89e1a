//! Physical-name substitution.
//!
//! Rewrites every reference to a logical table into its physical
//! `db.table` for one shard. Tables renamed without an alias get one (the
//! original logical name) so column qualifiers in the statement keep
//! resolving.

use std::collections::HashMap;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations_mut, Ident, ObjectName, Query, SetExpr, Statement, TableAlias, TableFactor,
    TableWithJoins,
};

/// logical table (lowercased, unqualified) → physical (db, table).
pub(crate) type RenameMap = HashMap<String, (String, String)>;

/// Rename every logical reference in the statement: an alias-preserving pass
/// over FROM positions first, then a visitor sweep that also reaches
/// subqueries in expression position.
pub(crate) fn rename_statement(stmt: &mut Statement, map: &RenameMap) {
    if let Statement::Query(q) = stmt {
        rename_in_query(q, map);
    }
    let _ = visit_relations_mut(stmt, |name: &mut ObjectName| {
        rename_object_name(name, map);
        ControlFlow::<()>::Continue(())
    });
}

pub(crate) fn rename_in_query(query: &mut Query, map: &RenameMap) {
    rename_in_set_expr(&mut query.body, map);
}

fn rename_in_set_expr(body: &mut SetExpr, map: &RenameMap) {
    match body {
        SetExpr::Select(select) => {
            for twj in &mut select.from {
                rename_in_table_with_joins(twj, map);
            }
        }
        SetExpr::Query(q) => rename_in_query(q, map),
        SetExpr::SetOperation { left, right, .. } => {
            rename_in_set_expr(left, map);
            rename_in_set_expr(right, map);
        }
        _ => {}
    }
}

pub(crate) fn rename_in_table_with_joins(twj: &mut TableWithJoins, map: &RenameMap) {
    rename_table_factor(&mut twj.relation, map);
    for join in &mut twj.joins {
        rename_table_factor(&mut join.relation, map);
    }
}

fn rename_table_factor(factor: &mut TableFactor, map: &RenameMap) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let logical = unqualified(name).to_lowercase();
            if let Some((db, table)) = map.get(&logical) {
                if alias.is_none() {
                    *alias = Some(TableAlias {
                        name: Ident::new(unqualified(name).to_string()),
                        columns: vec![],
                    });
                }
                *name = physical_name(db, table);
            }
        }
        TableFactor::Derived { subquery, .. } => rename_in_query(subquery, map),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => rename_in_table_with_joins(table_with_joins, map),
        _ => {}
    }
}

/// Rename a bare table reference (INSERT/DELETE targets).
pub(crate) fn rename_object_name(name: &mut ObjectName, map: &RenameMap) {
    let logical = unqualified(name).to_lowercase();
    if let Some((db, table)) = map.get(&logical) {
        *name = physical_name(db, table);
    }
}

pub(crate) fn unqualified(name: &ObjectName) -> &str {
    name.0
        .last()
        .map(|ident| ident.value.as_str())
        .unwrap_or_default()
}

pub(crate) fn physical_name(db: &str, table: &str) -> ObjectName {
    ObjectName(vec![Ident::new(db), Ident::new(table)])
}
