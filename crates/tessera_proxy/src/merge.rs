//! Result merging: one protocol-correct response out of per-shard results.

use std::cmp::{Ordering, Reverse};
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tessera_common::error::{ProxyError, ProxyResult};
use tessera_mysql::{QueryResult, Row, Value, PER_SHARD_ONLY_STATUS};
use tessera_plan::MergeRecipe;
use tessera_rewrite::{AggKind, AggSpec, LimitSpec, SortKey};

/// Merge per-shard results according to the recipe. `results` arrive in
/// completion order; ordering recipes impose the deterministic output order.
pub fn merge_results(recipe: &MergeRecipe, results: Vec<QueryResult>) -> ProxyResult<QueryResult> {
    if results.is_empty() {
        return Ok(QueryResult::default());
    }

    match recipe {
        MergeRecipe::Passthrough => {
            let mut iter = results.into_iter();
            let first = iter.next().expect("checked non-empty");
            if iter.next().is_some() {
                return Err(ProxyError::Internal(
                    "passthrough recipe with more than one result".into(),
                ));
            }
            Ok(first)
        }
        MergeRecipe::Concat {
            limit,
            distinct,
            visible,
        } => {
            let mut merged = concat(results);
            if *distinct {
                dedup_rows(&mut merged.rows, *visible);
            }
            apply_limit(&mut merged.rows, limit.as_ref());
            strip_hidden(&mut merged, *visible);
            Ok(merged)
        }
        MergeRecipe::OrderedMerge {
            keys,
            distinct,
            visible,
        } => {
            let mut merged = ordered_merge(results, keys);
            if *distinct {
                dedup_rows(&mut merged.rows, *visible);
            }
            strip_hidden(&mut merged, *visible);
            Ok(merged)
        }
        MergeRecipe::TopN {
            limit,
            keys,
            distinct,
            visible,
        } => {
            let mut merged = ordered_merge(results, keys);
            if *distinct {
                dedup_rows(&mut merged.rows, *visible);
            }
            apply_limit(&mut merged.rows, Some(limit));
            strip_hidden(&mut merged, *visible);
            Ok(merged)
        }
        MergeRecipe::Aggregate {
            group_keys,
            aggs,
            avg_fixups,
            sort_keys,
            limit,
            visible,
        } => {
            let mut merged = aggregate(results, group_keys, aggs, avg_fixups);
            if !sort_keys.is_empty() {
                merged.rows.sort_by(|a, b| compare_rows(a, b, sort_keys));
            }
            apply_limit(&mut merged.rows, limit.as_ref());
            strip_hidden(&mut merged, *visible);
            Ok(merged)
        }
    }
}

/// Union rows in arrival order; sum affected rows; first non-zero insert id;
/// sum warnings; OR status flags minus the per-shard-only bits.
fn concat(results: Vec<QueryResult>) -> QueryResult {
    let mut out = QueryResult::default();
    for r in results {
        if out.fields.is_empty() {
            out.fields = r.fields;
        }
        out.rows.extend(r.rows);
        out.affected_rows += r.affected_rows;
        if out.last_insert_id == 0 {
            out.last_insert_id = r.last_insert_id;
        }
        out.warnings = out.warnings.saturating_add(r.warnings);
        out.status |= r.status & !PER_SHARD_ONLY_STATUS;
    }
    out
}

fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let va = a.get(key.index).unwrap_or(&Value::Null);
        let vb = b.get(key.index).unwrap_or(&Value::Null);
        let ord = va.compare(vb);
        let ord = if key.asc { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

struct MergeEntry {
    row: Row,
    shard: usize,
    pos: usize,
    keys: Vec<SortKey>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for MergeEntry {}
impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.row, &other.row, &self.keys)
            // stable tie-break keeps the merge deterministic
            .then(self.shard.cmp(&other.shard))
    }
}

/// K-way merge over per-shard streams. Shards send their streams already
/// sorted (the rewriter keeps the per-shard ORDER BY); an unsorted stream
/// degrades to a final sort instead of a wrong answer.
fn ordered_merge(results: Vec<QueryResult>, keys: &[SortKey]) -> QueryResult {
    let presorted = results.iter().all(|r| {
        r.rows
            .windows(2)
            .all(|w| compare_rows(&w[0], &w[1], keys) != Ordering::Greater)
    });

    let mut out = concat_header(&results);
    let shard_rows: Vec<Vec<Row>> = results.into_iter().map(|r| r.rows).collect();
    let total: usize = shard_rows.iter().map(Vec::len).sum();

    if !presorted {
        let mut rows: Vec<Row> = shard_rows.into_iter().flatten().collect();
        rows.sort_by(|a, b| compare_rows(a, b, keys));
        out.rows = rows;
        return out;
    }

    let mut heap: BinaryHeap<Reverse<MergeEntry>> = BinaryHeap::new();
    for (shard, rows) in shard_rows.iter().enumerate() {
        if let Some(first) = rows.first() {
            heap.push(Reverse(MergeEntry {
                row: first.clone(),
                shard,
                pos: 0,
                keys: keys.to_vec(),
            }));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse(entry)) = heap.pop() {
        merged.push(entry.row);
        let next = entry.pos + 1;
        if let Some(row) = shard_rows[entry.shard].get(next) {
            heap.push(Reverse(MergeEntry {
                row: row.clone(),
                shard: entry.shard,
                pos: next,
                keys: entry.keys,
            }));
        }
    }
    out.rows = merged;
    out
}

/// Concat of everything except rows (fields, affected, status bits).
fn concat_header(results: &[QueryResult]) -> QueryResult {
    let mut out = QueryResult::default();
    for r in results {
        if out.fields.is_empty() {
            out.fields = r.fields.clone();
        }
        out.affected_rows += r.affected_rows;
        if out.last_insert_id == 0 {
            out.last_insert_id = r.last_insert_id;
        }
        out.warnings = out.warnings.saturating_add(r.warnings);
        out.status |= r.status & !PER_SHARD_ONLY_STATUS;
    }
    out
}

/// Group rows on the group keys and reduce each aggregate column.
fn aggregate(
    results: Vec<QueryResult>,
    group_keys: &[usize],
    aggs: &[AggSpec],
    avg_fixups: &[(usize, usize)],
) -> QueryResult {
    let mut out = concat_header(&results);

    let mut groups: HashMap<Vec<u8>, Row> = HashMap::new();
    let mut order: Vec<Vec<u8>> = Vec::new();

    for r in results {
        for row in r.rows {
            let key = encode_group_key(group_keys, &row);
            match groups.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    order.push(key);
                    slot.insert(row);
                }
                Entry::Occupied(mut slot) => {
                    let acc = slot.get_mut();
                    for agg in aggs {
                        let existing = acc.get(agg.index).cloned().unwrap_or(Value::Null);
                        let incoming = row.get(agg.index).cloned().unwrap_or(Value::Null);
                        let merged = match agg.kind {
                            AggKind::Count | AggKind::Sum => existing.add(&incoming),
                            AggKind::Min => {
                                if incoming.is_null()
                                    || (!existing.is_null()
                                        && existing.compare(&incoming) != Ordering::Greater)
                                {
                                    existing
                                } else {
                                    incoming
                                }
                            }
                            AggKind::Max => {
                                if incoming.is_null()
                                    || (!existing.is_null()
                                        && existing.compare(&incoming) != Ordering::Less)
                                {
                                    existing
                                } else {
                                    incoming
                                }
                            }
                        };
                        if let Some(cell) = acc.get_mut(agg.index) {
                            *cell = merged;
                        }
                    }
                }
            }
        }
    }

    let mut rows: Vec<Row> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect();

    // AVG = SUM / COUNT, NULL when the count is zero
    for row in &mut rows {
        for &(sum_idx, count_idx) in avg_fixups {
            let sum = row.get(sum_idx).cloned().unwrap_or(Value::Null);
            let count = row.get(count_idx).cloned().unwrap_or(Value::Null);
            let avg = match (sum.as_f64(), count.as_f64()) {
                (Some(s), Some(c)) if c != 0.0 => Value::Float(s / c),
                _ => Value::Null,
            };
            if let Some(cell) = row.get_mut(sum_idx) {
                *cell = avg;
            }
        }
    }

    out.rows = rows;
    out
}

/// Deterministic binary group key: type tag + value bytes per column.
fn encode_group_key(group_keys: &[usize], row: &Row) -> Vec<u8> {
    let mut key = Vec::with_capacity(group_keys.len() * 9 + 1);
    if group_keys.is_empty() {
        // global aggregate: single group
        key.push(0xff);
        return key;
    }
    for &i in group_keys {
        match row.get(i).unwrap_or(&Value::Null) {
            Value::Null => key.push(0),
            Value::Int(v) => {
                key.push(1);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Value::UInt(v) => {
                key.push(2);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float(v) => {
                key.push(3);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Value::Bytes(b) => {
                key.push(4);
                key.extend_from_slice(&(b.len() as u32).to_be_bytes());
                key.extend_from_slice(b);
            }
        }
    }
    key
}

fn dedup_rows(rows: &mut Vec<Row>, visible: Option<usize>) {
    let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(rows.len());
    rows.retain(|row| {
        let width = visible.unwrap_or(row.len()).min(row.len());
        let indexes: Vec<usize> = (0..width).collect();
        seen.insert(encode_group_key(&indexes, row))
    });
}

fn apply_limit(rows: &mut Vec<Row>, limit: Option<&LimitSpec>) {
    let Some(limit) = limit else { return };
    let offset = limit.offset.min(rows.len() as u64) as usize;
    if offset > 0 {
        rows.drain(..offset);
    }
    rows.truncate(limit.count as usize);
}

/// Drop the hidden sort/group columns the rewriter appended.
fn strip_hidden(result: &mut QueryResult, visible: Option<usize>) {
    let Some(visible) = visible else { return };
    result.fields.truncate(visible);
    for row in &mut result.rows {
        row.truncate(visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_mysql::{ColumnType, Field};

    fn rs(rows: Vec<Row>) -> QueryResult {
        QueryResult::result_set(
            vec![
                Field::new("a", ColumnType::LongLong),
                Field::new("b", ColumnType::VarChar),
            ],
            rows,
        )
    }

    fn int_row(vals: &[i64]) -> Row {
        vals.iter().map(|v| Value::Int(*v)).collect()
    }

    // ── concat ──────────────────────────────────────────────────────────

    #[test]
    fn concat_sums_affected_and_ors_status() {
        let mut a = QueryResult::ok(1, 0, 0x0002);
        a.warnings = 1;
        let b = QueryResult::ok(2, 42, 0x0001);
        let merged = merge_results(
            &MergeRecipe::Concat { limit: None, distinct: false, visible: None },
            vec![a, b],
        )
        .unwrap();
        assert_eq!(merged.affected_rows, 3);
        assert_eq!(merged.last_insert_id, 42);
        assert_eq!(merged.warnings, 1);
        assert_eq!(merged.status, 0x0003);
    }

    #[test]
    fn concat_excludes_per_shard_bits() {
        let a = QueryResult::ok(0, 0, 0x0002 | tessera_mysql::SERVER_STATUS_LAST_ROW_SENT);
        let merged = merge_results(
            &MergeRecipe::Concat { limit: None, distinct: false, visible: None },
            vec![a],
        )
        .unwrap();
        assert_eq!(merged.status, 0x0002);
    }

    // ── ordered merge / top-n ───────────────────────────────────────────

    #[test]
    fn kway_merge_orders_across_shards() {
        let a = rs(vec![int_row(&[10, 0]), int_row(&[20, 0])]);
        let b = rs(vec![int_row(&[5, 0]), int_row(&[15, 0]), int_row(&[25, 0])]);
        let merged = merge_results(
            &MergeRecipe::OrderedMerge {
                keys: vec![SortKey { index: 0, asc: true }],
                distinct: false,
                visible: None,
            },
            vec![a, b],
        )
        .unwrap();
        let got: Vec<i64> = merged.rows.iter().map(|r| match &r[0] {
            Value::Int(v) => *v,
            _ => panic!(),
        }).collect();
        assert_eq!(got, vec![5, 10, 15, 20, 25]);
    }

    #[test]
    fn topn_skips_offset_and_takes_count() {
        // scenario: orders for user 1 on shard A (10, 20), user 2 on
        // shard B (5, 15, 25); LIMIT 5,3 folded to LIMIT 8 per shard
        let a = rs(vec![int_row(&[10, 0]), int_row(&[20, 0])]);
        let b = rs(vec![int_row(&[5, 0]), int_row(&[15, 0]), int_row(&[25, 0])]);
        let merged = merge_results(
            &MergeRecipe::TopN {
                limit: LimitSpec { offset: 3, count: 2 },
                keys: vec![SortKey { index: 0, asc: true }],
                distinct: false,
                visible: None,
            },
            vec![a, b],
        )
        .unwrap();
        let got: Vec<i64> = merged.rows.iter().map(|r| match &r[0] {
            Value::Int(v) => *v,
            _ => panic!(),
        }).collect();
        assert_eq!(got, vec![20, 25]);
    }

    #[test]
    fn descending_keys_reverse() {
        let a = rs(vec![int_row(&[1, 0])]);
        let b = rs(vec![int_row(&[9, 0])]);
        let merged = merge_results(
            &MergeRecipe::OrderedMerge {
                keys: vec![SortKey { index: 0, asc: false }],
                distinct: false,
                visible: None,
            },
            vec![a, b],
        )
        .unwrap();
        assert_eq!(merged.rows[0][0], Value::Int(9));
    }

    #[test]
    fn unsorted_input_still_merges_correctly() {
        let a = rs(vec![int_row(&[20, 0]), int_row(&[10, 0])]); // not presorted
        let b = rs(vec![int_row(&[15, 0])]);
        let merged = merge_results(
            &MergeRecipe::OrderedMerge {
                keys: vec![SortKey { index: 0, asc: true }],
                distinct: false,
                visible: None,
            },
            vec![a, b],
        )
        .unwrap();
        let got: Vec<i64> = merged.rows.iter().map(|r| match &r[0] {
            Value::Int(v) => *v,
            _ => panic!(),
        }).collect();
        assert_eq!(got, vec![10, 15, 20]);
    }

    // ── hidden column stripping ─────────────────────────────────────────

    #[test]
    fn hidden_sort_key_is_stripped() {
        let mk = |rows| QueryResult::result_set(
            vec![
                Field::new("name", ColumnType::VarChar),
                Field::new("__sort_1", ColumnType::LongLong),
            ],
            rows,
        );
        let a = mk(vec![vec![Value::from_str("y"), Value::Int(2)]]);
        let b = mk(vec![vec![Value::from_str("x"), Value::Int(1)]]);
        let merged = merge_results(
            &MergeRecipe::OrderedMerge {
                keys: vec![SortKey { index: 1, asc: true }],
                distinct: false,
                visible: Some(1),
            },
            vec![a, b],
        )
        .unwrap();
        assert_eq!(merged.fields.len(), 1);
        assert_eq!(merged.rows, vec![vec![Value::from_str("x")], vec![Value::from_str("y")]]);
    }

    // ── aggregates ──────────────────────────────────────────────────────

    #[test]
    fn global_avg_divides_sum_by_count() {
        // AVG(age): shard A (200, 10), shard B (150, 5) → 350/15
        let mk = |sum: i64, count: i64| QueryResult::result_set(
            vec![
                Field::new("AVG(age)", ColumnType::NewDecimal),
                Field::new("__avg_cnt_0", ColumnType::LongLong),
            ],
            vec![vec![Value::Int(sum), Value::Int(count)]],
        );
        let merged = merge_results(
            &MergeRecipe::Aggregate {
                group_keys: vec![],
                aggs: vec![
                    AggSpec { kind: AggKind::Sum, index: 0 },
                    AggSpec { kind: AggKind::Count, index: 1 },
                ],
                avg_fixups: vec![(0, 1)],
                sort_keys: vec![],
                limit: None,
                visible: Some(1),
            },
            vec![mk(200, 10), mk(150, 5)],
        )
        .unwrap();
        assert_eq!(merged.rows.len(), 1);
        assert_eq!(merged.rows[0].len(), 1);
        match &merged.rows[0][0] {
            Value::Float(v) => assert!((v - 350.0 / 15.0).abs() < 1e-9),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn avg_of_zero_rows_is_null() {
        let mk = || QueryResult::result_set(
            vec![
                Field::new("s", ColumnType::LongLong),
                Field::new("c", ColumnType::LongLong),
            ],
            vec![vec![Value::Null, Value::Int(0)]],
        );
        let merged = merge_results(
            &MergeRecipe::Aggregate {
                group_keys: vec![],
                aggs: vec![
                    AggSpec { kind: AggKind::Sum, index: 0 },
                    AggSpec { kind: AggKind::Count, index: 1 },
                ],
                avg_fixups: vec![(0, 1)],
                sort_keys: vec![],
                limit: None,
                visible: Some(1),
            },
            vec![mk(), mk()],
        )
        .unwrap();
        assert_eq!(merged.rows[0][0], Value::Null);
    }

    #[test]
    fn grouped_count_reduces_per_group() {
        let mk = |rows| QueryResult::result_set(
            vec![
                Field::new("status", ColumnType::VarChar),
                Field::new("COUNT(*)", ColumnType::LongLong),
            ],
            rows,
        );
        let a = mk(vec![
            vec![Value::from_str("open"), Value::Int(2)],
            vec![Value::from_str("done"), Value::Int(1)],
        ]);
        let b = mk(vec![vec![Value::from_str("open"), Value::Int(3)]]);
        let merged = merge_results(
            &MergeRecipe::Aggregate {
                group_keys: vec![0],
                aggs: vec![AggSpec { kind: AggKind::Count, index: 1 }],
                avg_fixups: vec![],
                sort_keys: vec![SortKey { index: 0, asc: true }],
                limit: None,
                visible: None,
            },
            vec![a, b],
        )
        .unwrap();
        assert_eq!(
            merged.rows,
            vec![
                vec![Value::from_str("done"), Value::Int(1)],
                vec![Value::from_str("open"), Value::Int(5)],
            ]
        );
    }

    #[test]
    fn min_max_respect_nulls() {
        let mk = |min, max| QueryResult::result_set(
            vec![
                Field::new("mn", ColumnType::LongLong),
                Field::new("mx", ColumnType::LongLong),
            ],
            vec![vec![min, max]],
        );
        let merged = merge_results(
            &MergeRecipe::Aggregate {
                group_keys: vec![],
                aggs: vec![
                    AggSpec { kind: AggKind::Min, index: 0 },
                    AggSpec { kind: AggKind::Max, index: 1 },
                ],
                avg_fixups: vec![],
                sort_keys: vec![],
                limit: None,
                visible: None,
            },
            vec![mk(Value::Int(3), Value::Int(9)), mk(Value::Null, Value::Null), mk(Value::Int(1), Value::Int(12))],
        )
        .unwrap();
        assert_eq!(merged.rows[0], vec![Value::Int(1), Value::Int(12)]);
    }

    // ── distinct ────────────────────────────────────────────────────────

    #[test]
    fn distinct_dedups_across_shards() {
        let a = rs(vec![int_row(&[1, 1]), int_row(&[2, 2])]);
        let b = rs(vec![int_row(&[1, 1]), int_row(&[3, 3])]);
        let merged = merge_results(
            &MergeRecipe::Concat { limit: None, distinct: true, visible: None },
            vec![a, b],
        )
        .unwrap();
        assert_eq!(merged.rows.len(), 3);
    }

    #[test]
    fn empty_input_is_empty_result() {
        let merged = merge_results(&MergeRecipe::Passthrough, vec![]).unwrap();
        assert_eq!(merged, QueryResult::default());
    }
}
