//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Hash aggregation: GROUP BY, aggregates over the whole input, and
//! DISTINCT as a degenerate grouping with no accumulators.
//!
//! Group keys use null-safe equality (all NULLs land in one group); a
//! grouping with no GROUP BY still emits exactly one row, per the SQL
//! aggregate-over-empty contract.

use crate::arena::Arena;
use crate::block::{BlockHashTable, RowBlock};
use crate::sql::expr::{BlockRow, ScalarExpr};
use crate::value::{Cell, ColumnType};
use crate::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    CountStar,
    /// COUNT(expr): non-null inputs only.
    Count,
    Sum,
    Avg,
    Min,
    Max,
    StringAgg,
}

pub struct AggSpec {
    pub kind: AggKind,
    pub arg: Option<ScalarExpr>,
    /// STRING_AGG separator.
    pub sep: String,
}

impl AggSpec {
    /// Result column type, given the input schema.
    pub fn result_type(&self, types: &[ColumnType]) -> ColumnType {
        match self.kind {
            AggKind::CountStar | AggKind::Count => ColumnType::BigInt,
            AggKind::Avg => ColumnType::Float,
            AggKind::StringAgg => ColumnType::Text,
            AggKind::Sum => match self.arg.as_ref().map(|a| a.result_type(types)) {
                Some(t) if t == ColumnType::Float || t == ColumnType::Numeric => ColumnType::Float,
                Some(ColumnType::Interval) => ColumnType::Interval,
                _ => ColumnType::BigInt,
            },
            AggKind::Min | AggKind::Max => self
                .arg
                .as_ref()
                .map(|a| a.result_type(types))
                .unwrap_or(ColumnType::Text),
        }
    }
}

/// One running accumulator. SUM keeps integer and float lanes and
/// settles on float if any input was float.
enum Acc {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        is_float: bool,
        seen: bool,
    },
    SumInterval {
        total: crate::temporal::Interval,
        seen: bool,
    },
    Avg {
        sum: f64,
        n: i64,
    },
    MinMax {
        best: Option<Cell>,
        is_min: bool,
    },
    StringAgg {
        parts: Option<String>,
    },
}

impl Acc {
    fn new(spec: &AggSpec) -> Acc {
        match spec.kind {
            AggKind::CountStar | AggKind::Count => Acc::Count(0),
            AggKind::Sum => Acc::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
                seen: false,
            },
            AggKind::Avg => Acc::Avg { sum: 0.0, n: 0 },
            AggKind::Min => Acc::MinMax {
                best: None,
                is_min: true,
            },
            AggKind::Max => Acc::MinMax {
                best: None,
                is_min: false,
            },
            AggKind::StringAgg => Acc::StringAgg { parts: None },
        }
    }

    fn update(&mut self, spec: &AggSpec, value: Option<Cell>) -> DbResult<()> {
        match self {
            Acc::Count(n) => {
                // CountStar gets value = None and counts every row
                match (spec.kind, &value) {
                    (AggKind::CountStar, _) => *n += 1,
                    (_, Some(v)) if !v.is_null() => *n += 1,
                    _ => {}
                }
            }
            Acc::Sum {
                int,
                float,
                is_float,
                seen,
            } => {
                if let Some(v) = value {
                    match v {
                        Cell::Null => {}
                        Cell::Float(f) => {
                            *is_float = true;
                            *float += f;
                            *seen = true;
                        }
                        other => match other.as_i64() {
                            Some(i) => {
                                *int = int.checked_add(i).ok_or_else(|| {
                                    DbError::numeric_out_of_range("bigint out of range in SUM")
                                })?;
                                *float += i as f64;
                                *seen = true;
                            }
                            None => {
                                return Err(DbError::type_mismatch(
                                    "SUM requires a numeric argument",
                                ))
                            }
                        },
                    }
                }
            }
            Acc::SumInterval { total, seen } => {
                if let Some(Cell::Interval(iv)) = value {
                    *total = total.add(iv);
                    *seen = true;
                }
            }
            Acc::Avg { sum, n } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        match v.as_f64() {
                            Some(f) => {
                                *sum += f;
                                *n += 1;
                            }
                            None => {
                                return Err(DbError::type_mismatch(
                                    "AVG requires a numeric argument",
                                ))
                            }
                        }
                    }
                }
            }
            Acc::MinMax { best, is_min } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        let better = match best {
                            None => true,
                            // string ties break by byte comparison via Cell::compare
                            Some(b) => match v.compare(b) {
                                Some(std::cmp::Ordering::Less) => *is_min,
                                Some(std::cmp::Ordering::Greater) => !*is_min,
                                _ => false,
                            },
                        };
                        if better {
                            *best = Some(v);
                        }
                    }
                }
            }
            Acc::StringAgg { parts } => {
                if let Some(v) = value {
                    if let Some(s) = crate::value::format_cell(&v, None) {
                        match parts {
                            None => *parts = Some(s),
                            Some(acc) => {
                                acc.push_str(&spec.sep);
                                acc.push_str(&s);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize(self) -> Cell {
        match self {
            Acc::Count(n) => Cell::BigInt(n),
            Acc::Sum {
                int,
                float,
                is_float,
                seen,
            } => {
                if !seen {
                    Cell::Null
                } else if is_float {
                    Cell::Float(float)
                } else {
                    Cell::BigInt(int)
                }
            }
            Acc::SumInterval { total, seen } => {
                if seen {
                    Cell::Interval(total)
                } else {
                    Cell::Null
                }
            }
            Acc::Avg { sum, n } => {
                if n == 0 {
                    Cell::Null
                } else {
                    Cell::Float(sum / n as f64)
                }
            }
            Acc::MinMax { best, .. } => best.unwrap_or(Cell::Null),
            Acc::StringAgg { parts } => parts.map(Cell::Text).unwrap_or(Cell::Null),
        }
    }
}

fn acc_for(spec: &AggSpec, types: &[ColumnType]) -> Acc {
    if spec.kind == AggKind::Sum && spec.result_type(types) == ColumnType::Interval {
        Acc::SumInterval {
            total: crate::temporal::Interval::ZERO,
            seen: false,
        }
    } else {
        Acc::new(spec)
    }
}

fn key_hash(key: &[Cell]) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for cell in key {
        h ^= cell.hash32();
        h = h.wrapping_mul(16_777_619);
    }
    h
}

fn keys_eq_nullsafe(a: &[Cell], b: &[Cell]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_nullsafe(y))
}

/// Hash grouping. Output rows are the key cells followed by the
/// finalized aggregates, in hash-table entry order (first-seen order).
pub fn hash_group<'a>(
    arena: &'a Arena,
    blocks: &[RowBlock<'a>],
    key_exprs: &[ScalarExpr],
    aggs: &[AggSpec],
    input_types: &[ColumnType],
) -> DbResult<Vec<Vec<Cell>>> {
    let mut ht = BlockHashTable::new_in(arena, 64);
    let mut group_keys: Vec<Vec<Cell>> = Vec::new();
    let mut group_accs: Vec<Vec<Acc>> = Vec::new();

    for block in blocks {
        for i in 0..block.active_count() {
            let row = BlockRow {
                block,
                row: block.row_idx(i),
            };

            let mut key = Vec::with_capacity(key_exprs.len());
            for e in key_exprs {
                key.push(e.eval(&row)?);
            }
            let h = key_hash(&key);

            let entry = match ht.find(h, |e| keys_eq_nullsafe(&key, &group_keys[e as usize])) {
                Some(e) => e as usize,
                None => {
                    let e = ht.insert(arena, h);
                    debug_assert_eq!(e as usize, group_keys.len());
                    group_keys.push(key);
                    group_accs.push(aggs.iter().map(|s| acc_for(s, input_types)).collect());
                    e as usize
                }
            };

            for (acc, spec) in group_accs[entry].iter_mut().zip(aggs) {
                let value = match &spec.arg {
                    Some(arg) => Some(arg.eval(&row)?),
                    None => None,
                };
                acc.update(spec, value)?;
            }
        }
    }

    // aggregate over empty input with no GROUP BY still yields one row
    if group_keys.is_empty() && key_exprs.is_empty() {
        group_keys.push(Vec::new());
        group_accs.push(aggs.iter().map(|s| acc_for(s, input_types)).collect());
    }

    let mut out = Vec::with_capacity(group_keys.len());
    for (key, accs) in group_keys.into_iter().zip(group_accs) {
        let mut row = key;
        for acc in accs {
            row.push(acc.finalize());
        }
        out.push(row);
    }
    Ok(out)
}

/// DISTINCT: a grouping over all output expressions with no aggregates.
pub fn distinct<'a>(
    arena: &'a Arena,
    blocks: &[RowBlock<'a>],
    width: usize,
) -> DbResult<Vec<Vec<Cell>>> {
    let key_exprs: Vec<ScalarExpr> = (0..width).map(ScalarExpr::Column).collect();
    hash_group(arena, blocks, &key_exprs, &[], &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockWriter;

    fn blocks<'a>(arena: &'a Arena, rows: &[(Option<&str>, Option<i64>)]) -> Vec<RowBlock<'a>> {
        let mut w = BlockWriter::new(arena, vec![ColumnType::Text, ColumnType::BigInt]);
        for (k, v) in rows {
            w.push_row(&[
                k.map(|s| Cell::Text(s.into())).unwrap_or(Cell::Null),
                v.map(Cell::BigInt).unwrap_or(Cell::Null),
            ]);
        }
        w.finish()
    }

    const TYPES: [ColumnType; 2] = [ColumnType::Text, ColumnType::BigInt];

    #[test]
    fn group_by_with_sum() {
        let arena = Arena::new();
        let input = blocks(
            &arena,
            &[
                (Some("n"), Some(10)),
                (Some("n"), Some(20)),
                (Some("s"), Some(30)),
            ],
        );
        let keys = [ScalarExpr::Column(0)];
        let aggs = [AggSpec {
            kind: AggKind::Sum,
            arg: Some(ScalarExpr::Column(1)),
            sep: String::new(),
        }];
        let mut rows = hash_group(&arena, &input, &keys, &aggs, &TYPES).unwrap();
        rows.sort_by_key(|r| crate::value::format_cell(&r[0], None));
        assert_eq!(
            rows,
            vec![
                vec![Cell::Text("n".into()), Cell::BigInt(30)],
                vec![Cell::Text("s".into()), Cell::BigInt(30)],
            ]
        );
    }

    #[test]
    fn nulls_form_one_group() {
        let arena = Arena::new();
        let input = blocks(&arena, &[(None, Some(1)), (None, Some(2)), (Some("x"), Some(3))]);
        let keys = [ScalarExpr::Column(0)];
        let aggs = [AggSpec {
            kind: AggKind::CountStar,
            arg: None,
            sep: String::new(),
        }];
        let rows = hash_group(&arena, &input, &keys, &aggs, &TYPES).unwrap();
        assert_eq!(rows.len(), 2);
        let null_group = rows.iter().find(|r| r[0].is_null()).unwrap();
        assert_eq!(null_group[1], Cell::BigInt(2));
    }

    #[test]
    fn count_expr_skips_nulls() {
        let arena = Arena::new();
        let input = blocks(&arena, &[(Some("a"), Some(1)), (Some("a"), None)]);
        let aggs = [
            AggSpec {
                kind: AggKind::CountStar,
                arg: None,
                sep: String::new(),
            },
            AggSpec {
                kind: AggKind::Count,
                arg: Some(ScalarExpr::Column(1)),
                sep: String::new(),
            },
        ];
        let rows = hash_group(&arena, &input, &[], &aggs, &TYPES).unwrap();
        assert_eq!(rows, vec![vec![Cell::BigInt(2), Cell::BigInt(1)]]);
    }

    #[test]
    fn empty_input_without_group_by_emits_one_row() {
        let arena = Arena::new();
        let input = blocks(&arena, &[]);
        let aggs = [
            AggSpec {
                kind: AggKind::CountStar,
                arg: None,
                sep: String::new(),
            },
            AggSpec {
                kind: AggKind::Sum,
                arg: Some(ScalarExpr::Column(1)),
                sep: String::new(),
            },
        ];
        let rows = hash_group(&arena, &input, &[], &aggs, &TYPES).unwrap();
        assert_eq!(rows, vec![vec![Cell::BigInt(0), Cell::Null]]);
    }

    #[test]
    fn string_agg_concatenates_in_order() {
        let arena = Arena::new();
        let input = blocks(&arena, &[(Some("a"), Some(1)), (Some("b"), Some(2))]);
        let aggs = [AggSpec {
            kind: AggKind::StringAgg,
            arg: Some(ScalarExpr::Column(0)),
            sep: ",".into(),
        }];
        let rows = hash_group(&arena, &input, &[], &aggs, &TYPES).unwrap();
        assert_eq!(rows, vec![vec![Cell::Text("a,b".into())]]);
    }

    #[test]
    fn distinct_dedups_null_safely() {
        let arena = Arena::new();
        let input = blocks(
            &arena,
            &[(Some("a"), Some(1)), (Some("a"), Some(1)), (None, None), (None, None)],
        );
        let rows = distinct(&arena, &input, 2).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn min_max() {
        let arena = Arena::new();
        let input = blocks(&arena, &[(Some("b"), Some(5)), (Some("a"), Some(9))]);
        let aggs = [
            AggSpec {
                kind: AggKind::Min,
                arg: Some(ScalarExpr::Column(0)),
                sep: String::new(),
            },
            AggSpec {
                kind: AggKind::Max,
                arg: Some(ScalarExpr::Column(1)),
                sep: String::new(),
            },
        ];
        let rows = hash_group(&arena, &input, &[], &aggs, &TYPES).unwrap();
        assert_eq!(rows, vec![vec![Cell::Text("a".into()), Cell::BigInt(9)]]);
    }
}
