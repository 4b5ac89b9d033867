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

//! Hash equi-joins over row blocks. One side is hashed into an
//! arena-resident table (the right for left outer, the left for right
//! outer, per the outer-side rule), the other probes. NULL keys never
//! match; unmatched outer rows emit NULL-padded output.

use crate::arena::Arena;
use crate::block::{BlockHashTable, BlockWriter, RowBlock, IDX_NONE};
use crate::value::{Cell, ColumnType};
use crate::DbResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

/// Fold the per-cell canonical hashes of a key tuple.
fn hash_keys(row: &[Cell]) -> Option<u32> {
    let mut h: u32 = 2_166_136_261;
    for cell in row {
        if cell.is_null() {
            // NULL keys never participate in matching
            return None;
        }
        h ^= cell.hash32();
        h = h.wrapping_mul(16_777_619);
    }
    Some(h)
}

fn keys_of(row: &[Cell], keys: &[usize]) -> Vec<Cell> {
    keys.iter().map(|&k| row[k].clone()).collect()
}

fn keys_eq(a: &[Cell], b: &[Cell]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.sql_eq(y))
}

fn null_row(n: usize) -> Vec<Cell> {
    vec![Cell::Null; n]
}

/// Hash join. Output columns are always the left columns followed by
/// the right columns (semi/anti emit left columns only).
pub fn hash_join<'a>(
    arena: &'a Arena,
    left: &[RowBlock<'a>],
    right: &[RowBlock<'a>],
    left_types: &[ColumnType],
    right_types: &[ColumnType],
    left_keys: &[usize],
    right_keys: &[usize],
    kind: JoinKind,
) -> DbResult<Vec<RowBlock<'a>>> {
    let out_types: Vec<ColumnType> = match kind {
        JoinKind::Semi | JoinKind::Anti => left_types.to_vec(),
        _ => left_types.iter().chain(right_types.iter()).copied().collect(),
    };
    let mut w = BlockWriter::new(arena, out_types);

    if kind == JoinKind::Cross {
        for lb in left {
            for i in 0..lb.active_count() {
                let lrow = lb.get_row(i);
                for rb in right {
                    for j in 0..rb.active_count() {
                        let mut out = lrow.clone();
                        out.extend(rb.get_row(j));
                        w.push_row(&out);
                    }
                }
            }
        }
        return Ok(w.finish());
    }

    // hash the smaller side by default; the outer-join rules are fixed
    let build_is_right = match kind {
        JoinKind::Right => false,
        _ => true,
    };
    let (build_blocks, build_keys) = if build_is_right {
        (right, right_keys)
    } else {
        (left, left_keys)
    };
    let (probe_blocks, probe_keys) = if build_is_right {
        (left, left_keys)
    } else {
        (right, right_keys)
    };
    let build_width = if build_is_right {
        right_types.len()
    } else {
        left_types.len()
    };
    let probe_pad = null_row(build_width);

    // Build phase: materialize key tuples and row images of the build
    // side; rows with NULL keys are kept only for full-outer padding.
    let total_build: usize = build_blocks.iter().map(|b| b.active_count()).sum();
    let mut ht = BlockHashTable::new_in(arena, total_build.max(16));
    let mut entry_keys: Vec<Vec<Cell>> = Vec::with_capacity(total_build);
    let mut entry_rows: Vec<Vec<Cell>> = Vec::with_capacity(total_build);
    let mut entry_matched: Vec<bool> = Vec::with_capacity(total_build);
    let mut unkeyed_rows: Vec<Vec<Cell>> = Vec::new();

    for block in build_blocks {
        for i in 0..block.active_count() {
            let row = block.get_row(i);
            let key = keys_of(&row, build_keys);
            match hash_keys(&key) {
                Some(h) => {
                    let e = ht.insert(arena, h);
                    debug_assert_eq!(e as usize, entry_keys.len());
                    entry_keys.push(key);
                    entry_rows.push(row);
                    entry_matched.push(false);
                }
                None => unkeyed_rows.push(row),
            }
        }
    }

    // Probe phase
    for block in probe_blocks {
        for i in 0..block.active_count() {
            let row = block.get_row(i);
            let key = keys_of(&row, probe_keys);
            let mut matched = false;

            if let Some(h) = hash_keys(&key) {
                let mut e = ht.bucket_head(h);
                while e != IDX_NONE {
                    if ht.hash_at(e) == h && keys_eq(&key, &entry_keys[e as usize]) {
                        matched = true;
                        match kind {
                            JoinKind::Semi => break,
                            JoinKind::Anti => break,
                            _ => {
                                entry_matched[e as usize] = true;
                                let mut out;
                                if build_is_right {
                                    out = row.clone();
                                    out.extend(entry_rows[e as usize].iter().cloned());
                                } else {
                                    out = entry_rows[e as usize].clone();
                                    out.extend(row.iter().cloned());
                                }
                                w.push_row(&out);
                            }
                        }
                    }
                    e = ht.next(e);
                }
            }

            match kind {
                JoinKind::Semi => {
                    if matched {
                        w.push_row(&row);
                    }
                }
                JoinKind::Anti => {
                    if !matched {
                        w.push_row(&row);
                    }
                }
                JoinKind::Left | JoinKind::Full if !matched => {
                    let mut out = row.clone();
                    out.extend(probe_pad.iter().cloned());
                    w.push_row(&out);
                }
                JoinKind::Right if !matched => {
                    let mut out = probe_pad.clone();
                    out.extend(row.iter().cloned());
                    w.push_row(&out);
                }
                _ => {}
            }
        }
    }

    // Full outer: unmatched build rows (including NULL-keyed ones) get
    // NULL padding on the probe side.
    if kind == JoinKind::Full {
        let pad = null_row(left_types.len());
        for (e, row) in entry_rows.iter().enumerate() {
            if !entry_matched[e] {
                let mut out = pad.clone();
                out.extend(row.iter().cloned());
                w.push_row(&out);
            }
        }
        for row in &unkeyed_rows {
            let mut out = pad.clone();
            out.extend(row.iter().cloned());
            w.push_row(&out);
        }
    }

    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockWriter;

    fn make_blocks<'a>(
        arena: &'a Arena,
        types: &[ColumnType],
        rows: &[Vec<Cell>],
    ) -> Vec<RowBlock<'a>> {
        let mut w = BlockWriter::new(arena, types.to_vec());
        for r in rows {
            w.push_row(r);
        }
        w.finish()
    }

    fn collect(blocks: &[RowBlock<'_>]) -> Vec<Vec<Cell>> {
        crate::exec::blocks_to_rows(blocks)
    }

    fn sample<'a>(arena: &'a Arena) -> (Vec<RowBlock<'a>>, Vec<RowBlock<'a>>) {
        let left = make_blocks(
            arena,
            &[ColumnType::Int, ColumnType::Text],
            &[
                vec![Cell::Int(1), Cell::Text("a".into())],
                vec![Cell::Int(2), Cell::Text("b".into())],
                vec![Cell::Null, Cell::Text("n".into())],
            ],
        );
        let right = make_blocks(
            arena,
            &[ColumnType::Int, ColumnType::Text],
            &[
                vec![Cell::Int(2), Cell::Text("x".into())],
                vec![Cell::Int(3), Cell::Text("y".into())],
                vec![Cell::Null, Cell::Text("m".into())],
            ],
        );
        (left, right)
    }

    const LT: [ColumnType; 2] = [ColumnType::Int, ColumnType::Text];

    #[test]
    fn inner_join_null_keys_never_match() {
        let arena = Arena::new();
        let (l, r) = sample(&arena);
        let out = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Inner).unwrap();
        let rows = collect(&out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Cell::Int(2));
        assert_eq!(rows[0][3], Cell::Text("x".into()));
    }

    #[test]
    fn left_join_pads_unmatched() {
        let arena = Arena::new();
        let (l, r) = sample(&arena);
        let out = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Left).unwrap();
        let rows = collect(&out);
        assert_eq!(rows.len(), 3);
        let unmatched: Vec<&Vec<Cell>> = rows.iter().filter(|r| r[2].is_null()).collect();
        assert_eq!(unmatched.len(), 2); // id=1 and the NULL-keyed row
    }

    #[test]
    fn right_join_keeps_column_order() {
        let arena = Arena::new();
        let (l, r) = sample(&arena);
        let out = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Right).unwrap();
        let rows = collect(&out);
        assert_eq!(rows.len(), 3);
        // unmatched right rows pad the LEFT columns
        let padded: Vec<&Vec<Cell>> = rows.iter().filter(|r| r[0].is_null()).collect();
        assert_eq!(padded.len(), 2);
        for p in padded {
            assert!(!p[2].is_null() || matches!(p[3], Cell::Text(_)));
        }
    }

    #[test]
    fn full_join_emits_both_sides() {
        let arena = Arena::new();
        let (l, r) = sample(&arena);
        let out = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Full).unwrap();
        // 1 match + 2 unmatched left + 2 unmatched right
        assert_eq!(collect(&out).len(), 5);
    }

    #[test]
    fn semi_and_anti() {
        let arena = Arena::new();
        let (l, r) = sample(&arena);
        let semi = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Semi).unwrap();
        let semi_rows = collect(&semi);
        assert_eq!(semi_rows.len(), 1);
        assert_eq!(semi_rows[0].len(), 2); // left columns only

        let anti = hash_join(&arena, &l, &r, &LT, &LT, &[0], &[0], JoinKind::Anti).unwrap();
        // id=1 plus the NULL-keyed left row
        assert_eq!(collect(&anti).len(), 2);
    }

    #[test]
    fn duplicate_build_keys_emit_every_match() {
        let arena = Arena::new();
        let l = make_blocks(&arena, &[ColumnType::Int], &[vec![Cell::Int(1)]]);
        let r = make_blocks(
            &arena,
            &[ColumnType::Int],
            &[vec![Cell::Int(1)], vec![Cell::Int(1)]],
        );
        let out = hash_join(
            &arena,
            &l,
            &r,
            &[ColumnType::Int],
            &[ColumnType::Int],
            &[0],
            &[0],
            JoinKind::Inner,
        )
        .unwrap();
        assert_eq!(collect(&out).len(), 2);
    }
}
