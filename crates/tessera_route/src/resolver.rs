//! Shard-value resolution: WHERE-clause and VALUES analysis.
//!
//! Walks the parsed statement for conjunctive predicates on the rule's
//! sharding columns. Anything it cannot prove narrow (ORs, expressions,
//! non-literals, unsupported operators) degrades to a broadcast over the
//! rule's full shard set, never to a wrong subset.

use std::collections::BTreeSet;

use sqlparser::ast::{BinaryOperator, Expr, Ident, UnaryOperator, Value as AstValue};
use tessera_common::error::ProxyResult;
use tessera_script::Scalar;

use crate::rule::{ShardSet, TableRule};

/// Outcome of resolving one table's shard set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSetResolution {
    pub targets: ShardSet,
    /// True when no predicate narrowed the rule's full set.
    pub broadcast: bool,
    /// Equality/IN candidates found for the routing column, in source order.
    pub values: Vec<Scalar>,
}

/// Literal extraction the resolver and the insert splitter share.
pub fn extract_scalar(expr: &Expr) -> Option<Scalar> {
    match expr {
        Expr::Value(AstValue::Number(text, _)) => match text.parse::<i64>() {
            Ok(v) => Some(Scalar::Int(v)),
            Err(_) => Some(Scalar::Str(text.clone())),
        },
        Expr::Value(AstValue::SingleQuotedString(s))
        | Expr::Value(AstValue::DoubleQuotedString(s)) => Some(Scalar::Str(s.clone())),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match extract_scalar(expr)? {
            Scalar::Int(v) => Some(Scalar::Int(-v)),
            Scalar::Str(_) => None,
        },
        Expr::Nested(inner) => extract_scalar(inner),
        _ => None,
    }
}

fn column_name(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Identifier(ident) => Some(ident),
        Expr::CompoundIdentifier(parts) => parts.last(),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

/// One provable predicate on a sharding column.
#[derive(Debug)]
struct Constraint {
    indexes: BTreeSet<usize>,
    values: Option<Vec<Scalar>>,
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        other => out.push(other),
    }
}

fn classify(rule: &TableRule, conjunct: &Expr) -> Option<Constraint> {
    match conjunct {
        Expr::BinaryOp { left, op, right } => {
            let (col, lit, reversed) = match (column_name(left), column_name(right)) {
                (Some(col), _) if extract_scalar(right).is_some() => (col, right, false),
                (_, Some(col)) if extract_scalar(left).is_some() => (col, left, true),
                _ => return None,
            };
            if !rule.is_sharding_column(&col.value) {
                return None;
            }
            let scalar = extract_scalar(lit)?;

            match op {
                BinaryOperator::Eq => {
                    let index = rule.shard_index(&scalar)?;
                    Some(Constraint {
                        indexes: BTreeSet::from([index]),
                        values: Some(vec![scalar]),
                    })
                }
                BinaryOperator::Gt | BinaryOperator::GtEq | BinaryOperator::Lt
                | BinaryOperator::LtEq => {
                    let v = match &scalar {
                        Scalar::Int(v) => *v,
                        Scalar::Str(_) => return None,
                    };
                    // normalize to the column on the left (`5 < col` ≡ `col > 5`)
                    let effective = if reversed {
                        match op {
                            BinaryOperator::Gt => BinaryOperator::Lt,
                            BinaryOperator::GtEq => BinaryOperator::LtEq,
                            BinaryOperator::Lt => BinaryOperator::Gt,
                            BinaryOperator::LtEq => BinaryOperator::GtEq,
                            _ => unreachable!(),
                        }
                    } else {
                        op.clone()
                    };
                    let (low, high) = match effective {
                        BinaryOperator::Gt => (Some(v.saturating_add(1)), None),
                        BinaryOperator::GtEq => (Some(v), None),
                        BinaryOperator::Lt => (None, Some(v.saturating_sub(1))),
                        BinaryOperator::LtEq => (None, Some(v)),
                        _ => unreachable!(),
                    };
                    rule.range_indexes(low, high)
                        .map(|indexes| Constraint { indexes, values: None })
                }
                _ => None,
            }
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let col = column_name(expr)?;
            if !rule.is_sharding_column(&col.value) {
                return None;
            }
            let mut values = Vec::with_capacity(list.len());
            let mut indexes = BTreeSet::new();
            for item in list {
                let scalar = extract_scalar(item)?;
                indexes.insert(rule.shard_index(&scalar)?);
                values.push(scalar);
            }
            Some(Constraint {
                indexes,
                values: Some(values),
            })
        }
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => {
            let col = column_name(expr)?;
            if !rule.is_sharding_column(&col.value) {
                return None;
            }
            let lo = match extract_scalar(low)? {
                Scalar::Int(v) => v,
                Scalar::Str(_) => return None,
            };
            let hi = match extract_scalar(high)? {
                Scalar::Int(v) => v,
                Scalar::Str(_) => return None,
            };
            rule.range_indexes(Some(lo), Some(hi))
                .map(|indexes| Constraint { indexes, values: None })
        }
        Expr::Nested(inner) => classify(rule, inner),
        _ => None,
    }
}

fn merge(a: Constraint, b: Constraint) -> Constraint {
    let indexes: BTreeSet<usize> = a.indexes.intersection(&b.indexes).copied().collect();
    let values = match (a.values, b.values) {
        (Some(x), Some(y)) => Some(x.into_iter().filter(|v| y.contains(v)).collect()),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    };
    Constraint { indexes, values }
}

/// Resolve the shard set of one sharded table for a SELECT/UPDATE/DELETE.
pub fn resolve_where(
    rule: &TableRule,
    selection: Option<&Expr>,
    default_phy_db: &str,
) -> ProxyResult<ShardSetResolution> {
    let mut constraint: Option<Constraint> = None;

    if let Some(expr) = selection {
        let mut conjuncts = Vec::new();
        collect_conjuncts(expr, &mut conjuncts);
        for conjunct in conjuncts {
            if let Some(c) = classify(rule, conjunct) {
                constraint = Some(match constraint.take() {
                    Some(prev) => merge(prev, c),
                    None => c,
                });
            }
        }
    }

    match constraint {
        None => Ok(ShardSetResolution {
            targets: rule.full_shard_set(default_phy_db)?,
            broadcast: true,
            values: Vec::new(),
        }),
        Some(c) => {
            let values = c.values.clone().unwrap_or_default();
            let targets = match &c.values {
                Some(vals) => {
                    let mut out = ShardSet::new();
                    for v in vals {
                        if rule
                            .shard_index(v)
                            .map(|i| c.indexes.contains(&i))
                            .unwrap_or(false)
                        {
                            out.extend(rule.targets_for_value(v, default_phy_db)?);
                        }
                    }
                    out.sort();
                    out.dedup();
                    out
                }
                None => rule.targets_for_indexes(&c.indexes, default_phy_db)?,
            };
            Ok(ShardSetResolution {
                targets,
                broadcast: false,
                values,
            })
        }
    }
}

/// Shard-key value of one INSERT row, if the column is present with a
/// literal value.
pub fn row_shard_value(
    rule: &TableRule,
    columns: &[Ident],
    row: &[Expr],
) -> Option<Scalar> {
    let pos = columns
        .iter()
        .position(|c| rule.is_sharding_column(&c.value))?;
    row.get(pos).and_then(extract_scalar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;
    use tessera_common::config::{RuleKind, TableRuleConfig};

    fn rule4() -> TableRule {
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
        .unwrap()
    }

    fn range_rule() -> TableRule {
        TableRule::compile(&TableRuleConfig {
            db: "shop".into(),
            table: "events".into(),
            sharding_columns: vec!["ts".into()],
            db_expr: None,
            table_expr: "events_${0..3}".into(),
            slices: vec!["s0".into()],
            kind: RuleKind::Range,
            shard_count: None,
            ranges: vec![100, 200, 300],
            sequence: None,
        })
        .unwrap()
    }

    fn where_expr(clause: &str) -> Expr {
        let sql = format!("SELECT 1 FROM t WHERE {clause}");
        let stmts = Parser::parse_sql(&MySqlDialect {}, &sql).unwrap();
        match stmts.into_iter().next().unwrap() {
            sqlparser::ast::Statement::Query(q) => match *q.body {
                sqlparser::ast::SetExpr::Select(s) => s.selection.clone().unwrap(),
                _ => panic!("not a select"),
            },
            _ => panic!("not a query"),
        }
    }

    fn indexes(res: &ShardSetResolution) -> Vec<usize> {
        res.targets.iter().map(|t| t.index).collect()
    }

    // ── equality and IN ─────────────────────────────────────────────────

    #[test]
    fn equality_narrows_to_one_shard() {
        let res = resolve_where(&rule4(), Some(&where_expr("user_id = 6")), "d").unwrap();
        assert!(!res.broadcast);
        assert_eq!(indexes(&res), vec![2]);
        assert_eq!(res.values, vec![Scalar::Int(6)]);
    }

    #[test]
    fn reversed_equality_narrows() {
        let res = resolve_where(&rule4(), Some(&where_expr("6 = user_id")), "d").unwrap();
        assert_eq!(indexes(&res), vec![2]);
    }

    #[test]
    fn in_list_unions_shards() {
        let res = resolve_where(&rule4(), Some(&where_expr("user_id IN (1, 2)")), "d").unwrap();
        assert_eq!(indexes(&res), vec![1, 2]);
    }

    #[test]
    fn conjunction_intersects() {
        let res = resolve_where(
            &rule4(),
            Some(&where_expr("user_id IN (1, 2) AND user_id = 2")),
            "d",
        )
        .unwrap();
        assert_eq!(indexes(&res), vec![2]);
        assert_eq!(res.values, vec![Scalar::Int(2)]);
    }

    #[test]
    fn contradictory_conjunction_is_empty() {
        let res = resolve_where(
            &rule4(),
            Some(&where_expr("user_id = 1 AND user_id = 2")),
            "d",
        )
        .unwrap();
        assert!(res.targets.is_empty());
        assert!(!res.broadcast);
    }

    #[test]
    fn extra_predicates_do_not_widen() {
        let res = resolve_where(
            &rule4(),
            Some(&where_expr("user_id = 1 AND status = 'open'")),
            "d",
        )
        .unwrap();
        assert_eq!(indexes(&res), vec![1]);
    }

    // ── broadcast degradation ───────────────────────────────────────────

    #[test]
    fn no_where_broadcasts() {
        let res = resolve_where(&rule4(), None, "d").unwrap();
        assert!(res.broadcast);
        assert_eq!(res.targets.len(), 4);
    }

    #[test]
    fn or_degrades_to_broadcast() {
        let res = resolve_where(
            &rule4(),
            Some(&where_expr("user_id = 1 OR user_id = 2")),
            "d",
        )
        .unwrap();
        assert!(res.broadcast);
        assert_eq!(res.targets.len(), 4);
    }

    #[test]
    fn unsupported_operator_broadcasts() {
        let res = resolve_where(&rule4(), Some(&where_expr("user_id != 1")), "d").unwrap();
        assert!(res.broadcast);
    }

    #[test]
    fn non_shard_column_broadcasts() {
        let res = resolve_where(&rule4(), Some(&where_expr("status = 'open'")), "d").unwrap();
        assert!(res.broadcast);
    }

    #[test]
    fn range_predicate_on_hash_rule_broadcasts() {
        let res = resolve_where(&rule4(), Some(&where_expr("user_id > 5")), "d").unwrap();
        assert!(res.broadcast);
    }

    // ── range rules ─────────────────────────────────────────────────────

    #[test]
    fn between_narrows_range_rule() {
        let res = resolve_where(
            &range_rule(),
            Some(&where_expr("ts BETWEEN 150 AND 250")),
            "d",
        )
        .unwrap();
        assert_eq!(indexes(&res), vec![1, 2]);
    }

    #[test]
    fn open_range_narrows() {
        let res = resolve_where(&range_rule(), Some(&where_expr("ts >= 300")), "d").unwrap();
        assert_eq!(indexes(&res), vec![3]);

        let res = resolve_where(&range_rule(), Some(&where_expr("ts < 100")), "d").unwrap();
        assert_eq!(indexes(&res), vec![0]);
    }

    #[test]
    fn mirrored_range_comparison() {
        // 200 <= ts, written literal-first
        let res = resolve_where(&range_rule(), Some(&where_expr("200 <= ts")), "d").unwrap();
        assert_eq!(indexes(&res), vec![2, 3]);
    }

    // ── insert rows ─────────────────────────────────────────────────────

    #[test]
    fn insert_row_value_extraction() {
        let rule = rule4();
        let cols = vec![Ident::new("id"), Ident::new("user_id")];
        let row = vec![
            Expr::Value(AstValue::Number("10".into(), false)),
            Expr::Value(AstValue::Number("7".into(), false)),
        ];
        assert_eq!(row_shard_value(&rule, &cols, &row), Some(Scalar::Int(7)));

        let cols = vec![Ident::new("id")];
        let row = vec![Expr::Value(AstValue::Number("10".into(), false))];
        assert_eq!(row_shard_value(&rule, &cols, &row), None);
    }

    #[test]
    fn negative_literal_extraction() {
        assert_eq!(
            extract_scalar(&where_expr("user_id = -3")).map(|_| ()),
            None // the whole predicate is not a literal
        );
        let expr = Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(Expr::Value(AstValue::Number("3".into(), false))),
        };
        assert_eq!(extract_scalar(&expr), Some(Scalar::Int(-3)));
    }
}
