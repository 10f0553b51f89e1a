//! The parsed inline expression and its flattening.

use std::collections::{BTreeMap, BTreeSet};

use crate::eval::{Bindings, Scalar};
use crate::segment::{split_segments, SegmentGroup};
use tessera_common::error::ScriptError;

/// A parsed template such as `t_order_${0..3}` or `db_${id % 4}.t_${id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineExpression {
    expression: String,
    groups: Vec<SegmentGroup>,
}

impl InlineExpression {
    pub fn parse(expression: &str) -> Result<Self, ScriptError> {
        let groups = split_segments(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            groups,
        })
    }

    /// The source text; re-parsing it yields an equivalent expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Variables the scripts reference (the rule's sharding columns bind them).
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for g in &self.groups {
            for seg in &g.segments {
                if let Some(script) = &seg.script {
                    out.extend(script.variables().into_iter().map(str::to_string));
                }
            }
        }
        out
    }

    /// Flatten with no variable bindings.
    pub fn flat(&self) -> Result<BTreeSet<String>, ScriptError> {
        self.flat_with(&Bindings::new())
    }

    /// Expand with no bindings, preserving evaluation order (first occurrence
    /// wins on duplicates). Shard rules use this to number their physical
    /// targets: position in the enumeration is the shard index.
    pub fn enumerate(&self) -> Result<Vec<String>, ScriptError> {
        let env = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for group in &self.groups {
            let mut current: Vec<String> = Vec::new();
            for seg in &group.segments {
                let parts: Vec<String> = match &seg.script {
                    Some(script) => script
                        .execute(&env)?
                        .into_iter()
                        .map(|v| format!("{}{}", seg.prefix, v))
                        .collect(),
                    None => vec![seg.prefix.clone()],
                };
                current = out_join(current, parts);
            }
            for name in current {
                if seen.insert(name.clone()) {
                    out.push(name);
                }
            }
        }
        Ok(out)
    }

    /// Flatten under shard-key bindings: the expression is evaluated once per
    /// combination of candidate values, and all results union into a set.
    pub fn flat_with(&self, bindings: &Bindings) -> Result<BTreeSet<String>, ScriptError> {
        let mut out = BTreeSet::new();
        let vars: Vec<&String> = {
            let free = self.free_variables();
            bindings
                .keys()
                .filter(|k| free.contains(k.as_str()))
                .collect()
        };

        // missing bindings surface as unbound-variable errors during eval
        let mut envs: Vec<BTreeMap<String, Scalar>> = vec![BTreeMap::new()];
        for var in vars {
            let candidates = &bindings[var];
            if candidates.is_empty() {
                return Err(ScriptError::Eval(format!(
                    "no candidate values bound for variable {var}"
                )));
            }
            let mut next = Vec::with_capacity(envs.len() * candidates.len());
            for env in &envs {
                for value in candidates {
                    let mut env = env.clone();
                    env.insert(var.clone(), value.clone());
                    next.push(env);
                }
            }
            envs = next;
        }

        for env in &envs {
            for group in &self.groups {
                let mut current: Vec<String> = Vec::new();
                for seg in &group.segments {
                    let parts: Vec<String> = match &seg.script {
                        Some(script) => script
                            .execute(env)?
                            .into_iter()
                            .map(|v| format!("{}{}", seg.prefix, v))
                            .collect(),
                        None => vec![seg.prefix.clone()],
                    };
                    current = out_join(current, parts);
                }
                out.extend(current);
            }
        }
        Ok(out)
    }
}

/// Cross-product concatenation of the accumulated strings with the next
/// segment's expansion.
fn out_join(current: Vec<String>, parts: Vec<String>) -> Vec<String> {
    if current.is_empty() {
        return parts;
    }
    if parts.is_empty() {
        return current;
    }
    let mut out = Vec::with_capacity(current.len() * parts.len());
    for c in &current {
        for p in &parts {
            out.push(format!("{c}{p}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_sorted(expr: &str) -> Vec<String> {
        InlineExpression::parse(expr)
            .unwrap()
            .flat()
            .unwrap()
            .into_iter()
            .collect()
    }

    // ── plain flattening ────────────────────────────────────────────────

    #[test]
    fn literal_expression() {
        assert_eq!(flat_sorted("orders"), vec!["orders"]);
    }

    #[test]
    fn range_expansion() {
        assert_eq!(flat_sorted("t_${0..3}"), vec!["t_0", "t_1", "t_2", "t_3"]);
    }

    #[test]
    fn list_expansion() {
        assert_eq!(flat_sorted("t_${1, 3, 7}"), vec!["t_1", "t_3", "t_7"]);
    }

    #[test]
    fn suffix_after_script() {
        assert_eq!(
            flat_sorted("t_${0..1}_cold"),
            vec!["t_0_cold", "t_1_cold"]
        );
    }

    #[test]
    fn groups_union() {
        assert_eq!(
            flat_sorted("a_${0..1}, b_${0..0}"),
            vec!["a_0", "a_1", "b_0"]
        );
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(flat_sorted("t_${0, 0, 1}"), vec!["t_0", "t_1"]);
    }

    #[test]
    fn cross_product_within_group() {
        assert_eq!(
            flat_sorted("db_${0..1}.t_${0..1}"),
            vec!["db_0.t_0", "db_0.t_1", "db_1.t_0", "db_1.t_1"]
        );
    }

    // ── binding-driven flattening ───────────────────────────────────────

    #[test]
    fn bindings_correlate_scripts_in_one_row() {
        let expr = InlineExpression::parse("db_${id % 2}.t_${id}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert(
            "id".into(),
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)],
        );
        let flat: Vec<String> = expr.flat_with(&bindings).unwrap().into_iter().collect();
        assert_eq!(flat, vec!["db_0.t_2", "db_1.t_1", "db_1.t_3"]);
    }

    #[test]
    fn modulo_binding() {
        let expr = InlineExpression::parse("orders_${uid % 4}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("uid".into(), vec![Scalar::Int(6)]);
        let flat: Vec<String> = expr.flat_with(&bindings).unwrap().into_iter().collect();
        assert_eq!(flat, vec!["orders_2"]);
    }

    #[test]
    fn unbound_variable_fails_flat() {
        let expr = InlineExpression::parse("t_${id}").unwrap();
        assert!(expr.flat().is_err());
    }

    #[test]
    fn irrelevant_bindings_are_ignored() {
        let expr = InlineExpression::parse("t_${0..1}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert("other".into(), vec![Scalar::Int(9)]);
        assert_eq!(expr.flat_with(&bindings).unwrap().len(), 2);
    }

    #[test]
    fn free_variables_reported() {
        let expr = InlineExpression::parse("db_${id % 2}.t_${id + seq}").unwrap();
        let vars: Vec<String> = expr.free_variables().into_iter().collect();
        assert_eq!(vars, vec!["id", "seq"]);
    }

    // ── reprint round-trip ──────────────────────────────────────────────

    #[test]
    fn reprint_reparses_equivalent() {
        for src in ["t_${0..3}", "db_${id % 2}.t_${id}", "a_${1,2}, b"] {
            let e1 = InlineExpression::parse(src).unwrap();
            let e2 = InlineExpression::parse(e1.expression()).unwrap();
            assert_eq!(e1, e2);
        }
    }

    #[test]
    fn enumerate_preserves_evaluation_order() {
        let expr = InlineExpression::parse("t_${8..11}").unwrap();
        // BTreeSet order would put t_10/t_11 before t_8
        assert_eq!(
            expr.enumerate().unwrap(),
            vec!["t_8", "t_9", "t_10", "t_11"]
        );
    }

    #[test]
    fn string_scalar_binding() {
        let expr = InlineExpression::parse("t_${region}").unwrap();
        let mut bindings = Bindings::new();
        bindings.insert(
            "region".into(),
            vec![Scalar::Str("eu".into()), Scalar::Str("us".into())],
        );
        let flat: Vec<String> = expr.flat_with(&bindings).unwrap().into_iter().collect();
        assert_eq!(flat, vec!["t_eu", "t_us"]);
    }
}
