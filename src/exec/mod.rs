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

//! The block executor: scan, filter, project, sort over columnar row
//! blocks borrowed from the per-message arena. Joins, grouping and DML
//! live in their own submodules.

pub mod dml;
pub mod group;
pub mod join;

use std::cmp::Ordering;

use crate::arena::Arena;
use crate::block::{BlockWriter, RowBlock};
use crate::schema::{IndexDef, IndexKey, TableDef};
use crate::sql::expr::{BlockRow, ScalarExpr};
use crate::value::{coerce_cell, Cell, ColumnType};
use crate::DbResult;

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Materialize a base table into row blocks, in insertion order.
pub fn scan_table<'a>(arena: &'a Arena, table: &TableDef) -> Vec<RowBlock<'a>> {
    let types: Vec<ColumnType> = table.columns.iter().map(|c| c.ty).collect();
    let mut w = BlockWriter::new(arena, types);
    for row in &table.rows {
        w.push_row(row);
    }
    w.finish()
}

/// Index seek: materialize only the rows whose indexed column equals
/// `key`. The key must already be coerced to the column type.
pub fn scan_index<'a>(
    arena: &'a Arena,
    table: &TableDef,
    index: &IndexDef,
    key: &Cell,
) -> Vec<RowBlock<'a>> {
    let types: Vec<ColumnType> = table.columns.iter().map(|c| c.ty).collect();
    let mut w = BlockWriter::new(arena, types);
    if let Some(k) = IndexKey::from_cell(key) {
        if let Some(rows) = index.map.get(&k) {
            for &ri in rows {
                if let Some(row) = table.rows.get(ri) {
                    w.push_row(row);
                }
            }
        }
    }
    w.finish()
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Apply a predicate by shrinking each block's selection vector. Rows
/// evaluating to FALSE or UNKNOWN are excluded; no data is copied.
pub fn filter<'a>(
    arena: &'a Arena,
    blocks: &mut [RowBlock<'a>],
    pred: &ScalarExpr,
) -> DbResult<()> {
    for block in blocks.iter_mut() {
        let mut keep: Vec<u32> = Vec::with_capacity(block.active_count());
        for i in 0..block.active_count() {
            let idx = block.row_idx(i);
            let row = BlockRow {
                block: &*block,
                row: idx,
            };
            if pred.eval_bool(&row)? == Some(true) {
                keep.push(idx as u32);
            }
        }
        let sel = arena.alloc_slice_fill(keep.len(), 0u32);
        sel.copy_from_slice(&keep);
        block.sel_count = keep.len();
        block.sel = Some(sel);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Coerce an evaluated cell into the storage type of its output column.
/// Arithmetic widens to bigint/float internally; this narrows back with
/// range checks (overflow surfaces here).
pub fn coerce_for_storage(cell: Cell, ty: ColumnType) -> DbResult<Cell> {
    if cell.is_null() {
        return Ok(Cell::Null);
    }
    coerce_cell(cell, ty)
}

/// Evaluate expressions cell-by-cell into fresh column blocks. The
/// output is compacted: selection vectors are resolved away.
pub fn project<'a>(
    arena: &'a Arena,
    blocks: &[RowBlock<'a>],
    exprs: &[ScalarExpr],
    out_types: &[ColumnType],
) -> DbResult<Vec<RowBlock<'a>>> {
    let mut w = BlockWriter::new(arena, out_types.to_vec());
    let mut cells = vec![Cell::Null; exprs.len()];
    for block in blocks {
        for i in 0..block.active_count() {
            let row = BlockRow {
                block,
                row: block.row_idx(i),
            };
            for (j, e) in exprs.iter().enumerate() {
                cells[j] = coerce_for_storage(e.eval(&row)?, out_types[j])?;
            }
            w.push_row(&cells);
        }
    }
    Ok(w.finish())
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

pub struct SortKey {
    pub expr: ScalarExpr,
    pub asc: bool,
    /// Explicit NULLS FIRST/LAST; the default is last for ASC, first
    /// for DESC.
    pub nulls_first: Option<bool>,
}

fn compare_key_rows(a: &[Cell], b: &[Cell], keys: &[SortKey]) -> Ordering {
    for (i, k) in keys.iter().enumerate() {
        let (x, y) = (&a[i], &b[i]);
        let nulls_first = k.nulls_first.unwrap_or(!k.asc);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let o = x.compare(y).unwrap_or(Ordering::Equal);
                if k.asc {
                    o
                } else {
                    o.reverse()
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable multi-key sort: materializes all blocks into one buffer,
/// sorts a permutation, and gathers into fresh blocks.
pub fn sort<'a>(
    arena: &'a Arena,
    blocks: Vec<RowBlock<'a>>,
    keys: &[SortKey],
) -> DbResult<Vec<RowBlock<'a>>> {
    let types: Vec<ColumnType> = match blocks.first() {
        Some(b) => b.cols.iter().map(|c| c.ty).collect(),
        None => return Ok(blocks),
    };

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut key_rows: Vec<Vec<Cell>> = Vec::new();
    for block in &blocks {
        for i in 0..block.active_count() {
            let row = BlockRow {
                block,
                row: block.row_idx(i),
            };
            let mut ks = Vec::with_capacity(keys.len());
            for k in keys {
                ks.push(k.expr.eval(&row)?);
            }
            key_rows.push(ks);
            rows.push(block.get_row(i));
        }
    }

    let mut perm: Vec<usize> = (0..rows.len()).collect();
    perm.sort_by(|&x, &y| compare_key_rows(&key_rows[x], &key_rows[y], keys));

    let mut w = BlockWriter::new(arena, types);
    for &i in &perm {
        w.push_row(&rows[i]);
    }
    Ok(w.finish())
}

// ---------------------------------------------------------------------------
// Materialization helpers
// ---------------------------------------------------------------------------

/// Flatten blocks into owned rows, honoring selection vectors.
pub fn blocks_to_rows(blocks: &[RowBlock<'_>]) -> Vec<Vec<Cell>> {
    let mut out = Vec::new();
    for block in blocks {
        for i in 0..block.active_count() {
            out.push(block.get_row(i));
        }
    }
    out
}

/// Build blocks from owned rows of known column types.
pub fn rows_to_blocks<'a>(
    arena: &'a Arena,
    rows: &[Vec<Cell>],
    types: &[ColumnType],
) -> Vec<RowBlock<'a>> {
    let mut w = BlockWriter::new(arena, types.to_vec());
    for row in rows {
        w.push_row(row);
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;
    use crate::sql::expr::BinOp;

    fn sample_table() -> TableDef {
        let mut t = TableDef::new("t");
        t.columns.push(ColumnDesc::new("id", ColumnType::Int));
        t.columns.push(ColumnDesc::new("v", ColumnType::Text));
        for (i, v) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            t.rows.push(vec![Cell::Int(i), Cell::Text(v.into())]);
        }
        t
    }

    #[test]
    fn scan_filter_project() {
        let arena = Arena::new();
        let t = sample_table();
        let mut blocks = scan_table(&arena, &t);
        assert_eq!(blocks.iter().map(|b| b.active_count()).sum::<usize>(), 4);

        // id > 2
        let pred = ScalarExpr::Binary {
            op: BinOp::Gt,
            left: Box::new(ScalarExpr::Column(0)),
            right: Box::new(ScalarExpr::Literal(Cell::Int(2))),
        };
        filter(&arena, &mut blocks, &pred).unwrap();
        assert_eq!(blocks.iter().map(|b| b.active_count()).sum::<usize>(), 2);

        let out = project(
            &arena,
            &blocks,
            &[ScalarExpr::Column(1)],
            &[ColumnType::Text],
        )
        .unwrap();
        let rows = blocks_to_rows(&out);
        assert_eq!(
            rows,
            vec![vec![Cell::Text("c".into())], vec![Cell::Text("d".into())]]
        );
    }

    #[test]
    fn unknown_predicate_rows_are_excluded() {
        let arena = Arena::new();
        let mut t = sample_table();
        t.rows.push(vec![Cell::Null, Cell::Text("e".into())]);
        let mut blocks = scan_table(&arena, &t);

        // id > 0 is UNKNOWN for the NULL row
        let pred = ScalarExpr::Binary {
            op: BinOp::Gt,
            left: Box::new(ScalarExpr::Column(0)),
            right: Box::new(ScalarExpr::Literal(Cell::Int(0))),
        };
        filter(&arena, &mut blocks, &pred).unwrap();
        assert_eq!(blocks.iter().map(|b| b.active_count()).sum::<usize>(), 4);
    }

    #[test]
    fn stable_sort_with_null_ordering() {
        let arena = Arena::new();
        let mut t = TableDef::new("s");
        t.columns.push(ColumnDesc::new("k", ColumnType::Int));
        t.columns.push(ColumnDesc::new("tag", ColumnType::Text));
        for (k, tag) in [
            (Cell::Int(2), "first2"),
            (Cell::Null, "null1"),
            (Cell::Int(1), "one"),
            (Cell::Int(2), "second2"),
        ] {
            t.rows.push(vec![k, Cell::Text(tag.into())]);
        }
        let blocks = scan_table(&arena, &t);
        let keys = [SortKey {
            expr: ScalarExpr::Column(0),
            asc: true,
            nulls_first: None,
        }];
        let sorted = sort(&arena, blocks, &keys).unwrap();
        let rows = blocks_to_rows(&sorted);
        let tags: Vec<String> = rows
            .iter()
            .map(|r| match &r[1] {
                Cell::Text(s) => s.clone(),
                _ => unreachable!(),
            })
            .collect();
        // ASC puts NULL last; ties keep input order (stable)
        assert_eq!(tags, vec!["one", "first2", "second2", "null1"]);
    }

    #[test]
    fn index_seek_matches_equality() {
        let arena = Arena::new();
        let mut t = sample_table();
        t.indexes.push(IndexDef {
            name: "t_id_idx".into(),
            column: 0,
            unique: false,
            kind: crate::schema::IndexKind::Hash,
            map: Default::default(),
        });
        t.rebuild_indexes();
        let idx = t.index_on(0).unwrap();
        let blocks = scan_index(&arena, &t, idx, &Cell::Int(3));
        let rows = blocks_to_rows(&blocks);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Cell::Text("c".into()));
    }
}
