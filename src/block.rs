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

//! Columnar row blocks — the executor's unit of work — and the
//! arena-resident hash table used for joins, GROUP BY and DISTINCT.
//!
//! A block holds up to 1024 rows: 1024 × 8 bytes is 8 KB per numeric
//! column, small enough to stay cache-resident. Filters never copy
//! data; they only shrink an optional selection vector of active row
//! indices.

use uuid::Uuid;

use crate::arena::Arena;
use crate::temporal::Interval;
use crate::value::{Cell, ColumnType, Storage};

pub const BLOCK_CAPACITY: usize = 1024;

/// Sentinel for "no entry" in hash buckets and chain links.
pub const IDX_NONE: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// Column blocks
// ---------------------------------------------------------------------------

/// Typed contiguous storage for one column of a block, bump-allocated.
pub enum ColData<'a> {
    I16(&'a mut [i16]),
    I32(&'a mut [i32]),
    I64(&'a mut [i64]),
    F64(&'a mut [f64]),
    Str(&'a mut [&'a str]),
    Interval(&'a mut [Interval]),
    Uuid(&'a mut [Uuid]),
}

/// One column of a row block: typed array plus a parallel NULL-flag
/// byte vector. Index positions stay stable for the block's lifetime so
/// parallel columns can be joined by index.
pub struct ColBlock<'a> {
    pub ty: ColumnType,
    pub nulls: &'a mut [u8],
    pub data: ColData<'a>,
}

impl<'a> ColBlock<'a> {
    pub fn new_in(arena: &'a Arena, ty: ColumnType) -> Self {
        let data = match ty.storage() {
            Storage::I16 => ColData::I16(arena.alloc_slice_fill(BLOCK_CAPACITY, 0i16)),
            Storage::I32 => ColData::I32(arena.alloc_slice_fill(BLOCK_CAPACITY, 0i32)),
            Storage::I64 => ColData::I64(arena.alloc_slice_fill(BLOCK_CAPACITY, 0i64)),
            Storage::F64 => ColData::F64(arena.alloc_slice_fill(BLOCK_CAPACITY, 0f64)),
            Storage::Str => ColData::Str(arena.alloc_slice_fill(BLOCK_CAPACITY, "")),
            Storage::Interval => {
                ColData::Interval(arena.alloc_slice_fill(BLOCK_CAPACITY, Interval::ZERO))
            }
            Storage::Uuid => ColData::Uuid(arena.alloc_slice_fill(BLOCK_CAPACITY, Uuid::nil())),
        };
        ColBlock {
            ty,
            nulls: arena.alloc_slice_fill(BLOCK_CAPACITY, 0u8),
            data,
        }
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.nulls[i] != 0
    }

    /// Materialize the cell at `i` as an owned value.
    pub fn get(&self, i: usize) -> Cell {
        if self.is_null(i) {
            return Cell::Null;
        }
        match (&self.data, self.ty) {
            (ColData::I16(v), _) => Cell::SmallInt(v[i]),
            (ColData::I32(v), ColumnType::Boolean) => Cell::Bool(v[i] != 0),
            (ColData::I32(v), ColumnType::Date) => Cell::Date(v[i]),
            (ColData::I32(v), ColumnType::Enum) => Cell::Enum(v[i]),
            (ColData::I32(v), _) => Cell::Int(v[i]),
            (ColData::I64(v), ColumnType::Time) => Cell::Time(v[i]),
            (ColData::I64(v), ColumnType::Timestamp) => Cell::Timestamp(v[i]),
            (ColData::I64(v), ColumnType::TimestampTz) => Cell::TimestampTz(v[i]),
            (ColData::I64(v), _) => Cell::BigInt(v[i]),
            (ColData::F64(v), _) => Cell::Float(v[i]),
            (ColData::Str(v), _) => Cell::Text(v[i].to_string()),
            (ColData::Interval(v), _) => Cell::Interval(v[i]),
            (ColData::Uuid(v), _) => Cell::Uuid(v[i]),
        }
    }

    /// Store a cell at `i`. The cell must already be coerced to this
    /// column's type; text is copied into the arena.
    pub fn set(&mut self, i: usize, arena: &'a Arena, cell: &Cell) {
        if cell.is_null() {
            self.nulls[i] = 1;
            return;
        }
        self.nulls[i] = 0;
        match &mut self.data {
            ColData::I16(v) => v[i] = cell.as_i64().unwrap_or(0) as i16,
            ColData::I32(v) => v[i] = cell.as_i64().unwrap_or(0) as i32,
            ColData::I64(v) => v[i] = cell.as_i64().unwrap_or(0),
            ColData::F64(v) => v[i] = cell.as_f64().unwrap_or(0.0),
            ColData::Str(v) => {
                v[i] = match cell {
                    Cell::Text(s) => arena.alloc_str(s),
                    other => arena.alloc_str(
                        &crate::value::format_cell(other, None).unwrap_or_default(),
                    ),
                }
            }
            ColData::Interval(v) => {
                if let Cell::Interval(iv) = cell {
                    v[i] = *iv;
                }
            }
            ColData::Uuid(v) => {
                if let Cell::Uuid(u) = cell {
                    v[i] = *u;
                }
            }
        }
    }

    /// FNV-1a hash of the cell at `i`; NULL hashes to 0.
    pub fn hash_cell(&self, i: usize) -> u32 {
        if self.is_null(i) {
            return 0;
        }
        self.get(i).hash32()
    }

    /// Strict equality between two cells: NULL never matches.
    pub fn cell_eq(&self, i: usize, other: &ColBlock<'_>, j: usize) -> bool {
        if self.is_null(i) || other.is_null(j) {
            return false;
        }
        self.get(i).sql_eq(&other.get(j))
    }
}

// ---------------------------------------------------------------------------
// Row blocks
// ---------------------------------------------------------------------------

/// A horizontal slice of up to 1024 rows. All column blocks share the
/// row count; when `sel` is present only the listed indices are active.
pub struct RowBlock<'a> {
    pub count: usize,
    pub cols: Vec<ColBlock<'a>>,
    pub sel: Option<&'a mut [u32]>,
    pub sel_count: usize,
}

impl<'a> RowBlock<'a> {
    pub fn new_in(arena: &'a Arena, types: &[ColumnType]) -> Self {
        RowBlock {
            count: 0,
            cols: types.iter().map(|&t| ColBlock::new_in(arena, t)).collect(),
            sel: None,
            sel_count: 0,
        }
    }

    /// Effective row count, respecting the selection vector.
    pub fn active_count(&self) -> usize {
        if self.sel.is_some() {
            self.sel_count
        } else {
            self.count
        }
    }

    /// Effective row index at active position `i`.
    pub fn row_idx(&self, i: usize) -> usize {
        match &self.sel {
            Some(sel) => sel[i] as usize,
            None => i,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count == BLOCK_CAPACITY
    }

    /// Append a row of pre-coerced cells.
    pub fn push_row(&mut self, arena: &'a Arena, cells: &[Cell]) {
        debug_assert!(self.count < BLOCK_CAPACITY);
        debug_assert_eq!(cells.len(), self.cols.len());
        let i = self.count;
        for (col, cell) in self.cols.iter_mut().zip(cells) {
            col.set(i, arena, cell);
        }
        self.count += 1;
    }

    /// Materialize the active row at position `i` as owned cells.
    pub fn get_row(&self, i: usize) -> Vec<Cell> {
        let idx = self.row_idx(i);
        self.cols.iter().map(|c| c.get(idx)).collect()
    }
}

/// Builder that spreads appended rows across 1024-row blocks.
pub struct BlockWriter<'a> {
    arena: &'a Arena,
    types: Vec<ColumnType>,
    done: Vec<RowBlock<'a>>,
    cur: RowBlock<'a>,
}

impl<'a> BlockWriter<'a> {
    pub fn new(arena: &'a Arena, types: Vec<ColumnType>) -> Self {
        let cur = RowBlock::new_in(arena, &types);
        BlockWriter {
            arena,
            types,
            done: Vec::new(),
            cur,
        }
    }

    pub fn push_row(&mut self, cells: &[Cell]) {
        if self.cur.is_full() {
            let full = std::mem::replace(&mut self.cur, RowBlock::new_in(self.arena, &self.types));
            self.done.push(full);
        }
        self.cur.push_row(self.arena, cells);
    }

    pub fn finish(mut self) -> Vec<RowBlock<'a>> {
        if self.cur.count > 0 {
            self.done.push(self.cur);
        }
        self.done
    }
}

// ---------------------------------------------------------------------------
// Arena-resident hash table
// ---------------------------------------------------------------------------

/// Open-addressed-by-chaining hash table living entirely in the arena:
/// a power-of-two bucket array of entry heads, parallel chain-next and
/// cached-hash arrays. Entries are append-only (indices 0..len); key
/// payloads live in caller-side parallel arrays. Nothing is freed per
/// entry — the arena reset releases everything.
pub struct BlockHashTable<'a> {
    buckets: &'a mut [u32],
    nexts: &'a mut [u32],
    hashes: &'a mut [u32],
    nbuckets: u32,
    capacity: u32,
    count: u32,
}

impl<'a> BlockHashTable<'a> {
    pub fn new_in(arena: &'a Arena, capacity_hint: usize) -> Self {
        let nbuckets = capacity_hint.next_power_of_two().max(16) as u32;
        // grow before chains get long: capacity is 3/4 of the buckets
        let capacity = nbuckets - nbuckets / 4;
        BlockHashTable {
            buckets: arena.alloc_slice_fill(nbuckets as usize, IDX_NONE),
            nexts: arena.alloc_slice_fill(capacity as usize, IDX_NONE),
            hashes: arena.alloc_slice_fill(capacity as usize, 0u32),
            nbuckets,
            capacity,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Head of the chain for `hash`, or `IDX_NONE`.
    pub fn bucket_head(&self, hash: u32) -> u32 {
        self.buckets[(hash & (self.nbuckets - 1)) as usize]
    }

    /// Next entry in the same bucket chain, or `IDX_NONE`.
    pub fn next(&self, entry: u32) -> u32 {
        self.nexts[entry as usize]
    }

    pub fn hash_at(&self, entry: u32) -> u32 {
        self.hashes[entry as usize]
    }

    /// Append an entry with the given hash, growing at load > 0.75.
    /// Returns the new entry index.
    pub fn insert(&mut self, arena: &'a Arena, hash: u32) -> u32 {
        if self.count == self.capacity {
            self.grow(arena);
        }
        let entry = self.count;
        let b = (hash & (self.nbuckets - 1)) as usize;
        self.hashes[entry as usize] = hash;
        self.nexts[entry as usize] = self.buckets[b];
        self.buckets[b] = entry;
        self.count += 1;
        entry
    }

    /// Walk the chain for `hash` calling `eq` on entries with a matching
    /// cached hash; returns the first entry for which it is true.
    pub fn find(&self, hash: u32, mut eq: impl FnMut(u32) -> bool) -> Option<u32> {
        let mut e = self.bucket_head(hash);
        while e != IDX_NONE {
            if self.hashes[e as usize] == hash && eq(e) {
                return Some(e);
            }
            e = self.nexts[e as usize];
        }
        None
    }

    fn grow(&mut self, arena: &'a Arena) {
        let new_nbuckets = self.nbuckets * 2;
        let new_capacity = new_nbuckets - new_nbuckets / 4;

        let buckets = arena.alloc_slice_fill(new_nbuckets as usize, IDX_NONE);
        let nexts = arena.alloc_slice_fill(new_capacity as usize, IDX_NONE);
        let hashes = arena.alloc_slice_fill(new_capacity as usize, 0u32);
        hashes[..self.count as usize].copy_from_slice(&self.hashes[..self.count as usize]);

        // re-link every entry from its cached hash; old arrays are
        // abandoned to the arena
        for e in 0..self.count {
            let b = (hashes[e as usize] & (new_nbuckets - 1)) as usize;
            nexts[e as usize] = buckets[b];
            buckets[b] = e;
        }

        self.buckets = buckets;
        self.nexts = nexts;
        self.hashes = hashes;
        self.nbuckets = new_nbuckets;
        self.capacity = new_capacity;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_stores_and_reads_cells() {
        let arena = Arena::new();
        let mut block = RowBlock::new_in(&arena, &[ColumnType::Int, ColumnType::Text]);
        block.push_row(&arena, &[Cell::Int(1), Cell::Text("alice".into())]);
        block.push_row(&arena, &[Cell::Null, Cell::Text("bob".into())]);

        assert_eq!(block.count, 2);
        assert_eq!(block.cols[0].get(0), Cell::Int(1));
        assert!(block.cols[0].is_null(1));
        assert_eq!(block.cols[1].get(1), Cell::Text("bob".into()));
    }

    #[test]
    fn selection_vector_traversal() {
        let arena = Arena::new();
        let mut block = RowBlock::new_in(&arena, &[ColumnType::Int]);
        for i in 0..10 {
            block.push_row(&arena, &[Cell::Int(i)]);
        }
        let sel = arena.alloc_slice_fill(3, 0u32);
        sel.copy_from_slice(&[1, 4, 9]);
        block.sel = Some(sel);
        block.sel_count = 3;

        assert_eq!(block.active_count(), 3);
        let picked: Vec<Cell> = (0..3).map(|i| block.cols[0].get(block.row_idx(i))).collect();
        assert_eq!(picked, vec![Cell::Int(1), Cell::Int(4), Cell::Int(9)]);
    }

    #[test]
    fn full_block_and_empty_selection() {
        let arena = Arena::new();
        let mut block = RowBlock::new_in(&arena, &[ColumnType::BigInt]);
        for i in 0..BLOCK_CAPACITY {
            block.push_row(&arena, &[Cell::BigInt(i as i64)]);
        }
        assert!(block.is_full());
        assert_eq!(block.active_count(), BLOCK_CAPACITY);

        block.sel = Some(arena.alloc_slice_fill(0, 0u32));
        block.sel_count = 0;
        assert_eq!(block.active_count(), 0);
    }

    #[test]
    fn writer_splits_blocks_at_capacity() {
        let arena = Arena::new();
        let mut w = BlockWriter::new(&arena, vec![ColumnType::Int]);
        for i in 0..(BLOCK_CAPACITY + 5) {
            w.push_row(&[Cell::Int(i as i32)]);
        }
        let blocks = w.finish();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].count, BLOCK_CAPACITY);
        assert_eq!(blocks[1].count, 5);
    }

    #[test]
    fn hash_table_chains_and_grows() {
        let arena = Arena::new();
        let mut ht = BlockHashTable::new_in(&arena, 4);
        let keys: Vec<i64> = (0..500).collect();
        for &k in &keys {
            let h = Cell::BigInt(k).hash32();
            ht.insert(&arena, h);
        }
        assert_eq!(ht.len(), 500);

        // every entry's cached hash must equal the canonical hash of its key
        for (e, &k) in keys.iter().enumerate() {
            assert_eq!(ht.hash_at(e as u32), Cell::BigInt(k).hash32());
        }
        // chain lookup finds the right entry
        let probe = Cell::BigInt(123).hash32();
        let found = ht.find(probe, |e| keys[e as usize] == 123);
        assert_eq!(found, Some(123));
        assert_eq!(ht.find(probe, |_| false), None);
    }

    #[test]
    fn null_cells_never_match() {
        let arena = Arena::new();
        let mut block = RowBlock::new_in(&arena, &[ColumnType::Int]);
        block.push_row(&arena, &[Cell::Null]);
        block.push_row(&arena, &[Cell::Null]);
        assert!(!block.cols[0].cell_eq(0, &block.cols[0], 1));
        assert_eq!(block.cols[0].hash_cell(0), 0);
    }
}
