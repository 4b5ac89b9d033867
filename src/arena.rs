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

//! Per-message scratch arena: O(1) bump allocation, no per-object free,
//! bulk release by reset. Row blocks, selection vectors, hash-table
//! arrays and temporary strings for one protocol message all borrow
//! from one arena and are released together.

use std::cell::{Cell as StdCell, RefCell};
use std::mem::{align_of, size_of};

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

struct Chunk {
    buf: Box<[u8]>,
}

/// Cursor into the arena; everything allocated after a checkpoint is
/// freed by `reset_to`.
#[derive(Debug, Clone, Copy)]
pub struct ArenaMark {
    chunk: usize,
    offset: usize,
    oversize: usize,
}

pub struct Arena {
    chunks: RefCell<Vec<Chunk>>,
    /// Index of the chunk currently being bumped.
    current: StdCell<usize>,
    /// Bump offset within the current chunk.
    offset: StdCell<usize>,
    /// Allocations larger than a chunk get their own boxes so reset can
    /// drop them without wasting space in the main chain.
    oversize: RefCell<Vec<Box<[u8]>>>,
    chunk_size: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Arena {
            chunks: RefCell::new(vec![Chunk {
                buf: vec![0u8; chunk_size].into_boxed_slice(),
            }]),
            current: StdCell::new(0),
            offset: StdCell::new(0),
            oversize: RefCell::new(Vec::new()),
            chunk_size,
        }
    }

    /// Raw aligned allocation. The returned pointer is valid until the
    /// next `reset`/`reset_to` that covers it.
    fn alloc_raw(&self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());

        if size > self.chunk_size {
            // oversize side list; Box data pointer is stable
            let mut buf = vec![0u8; size + align].into_boxed_slice();
            let base = buf.as_mut_ptr() as usize;
            let aligned = (base + align - 1) & !(align - 1);
            let ptr = (buf.as_mut_ptr() as usize + (aligned - base)) as *mut u8;
            self.oversize.borrow_mut().push(buf);
            return ptr;
        }

        let mut chunks = self.chunks.borrow_mut();
        loop {
            let cur = self.current.get();
            let base = chunks[cur].buf.as_ptr() as usize;
            let aligned = (base + self.offset.get() + align - 1) & !(align - 1);
            let end = aligned - base + size;
            if end <= chunks[cur].buf.len() {
                self.offset.set(end);
                return (chunks[cur].buf.as_mut_ptr() as usize + (aligned - base)) as *mut u8;
            }
            // advance to the next chunk, growing the chain if needed
            if cur + 1 == chunks.len() {
                chunks.push(Chunk {
                    buf: vec![0u8; self.chunk_size].into_boxed_slice(),
                });
            }
            self.current.set(cur + 1);
            self.offset.set(0);
        }
    }

    /// Allocate a slice of `n` copies of `val`.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_fill<T: Copy>(&self, n: usize, val: T) -> &mut [T] {
        if n == 0 {
            return &mut [];
        }
        let ptr = self.alloc_raw(n * size_of::<T>(), align_of::<T>()) as *mut T;
        unsafe {
            for i in 0..n {
                ptr.add(i).write(val);
            }
            std::slice::from_raw_parts_mut(ptr, n)
        }
    }

    /// Copy a string into the arena.
    pub fn alloc_str(&self, s: &str) -> &str {
        if s.is_empty() {
            return "";
        }
        let ptr = self.alloc_raw(s.len(), 1);
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), ptr, s.len());
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(ptr, s.len()))
        }
    }

    /// Record the current cursor.
    pub fn checkpoint(&self) -> ArenaMark {
        ArenaMark {
            chunk: self.current.get(),
            offset: self.offset.get(),
            oversize: self.oversize.borrow().len(),
        }
    }

    /// Free everything allocated after `mark`. Requires `&mut self`, so
    /// no borrows of the freed region can survive the call.
    pub fn reset_to(&mut self, mark: ArenaMark) {
        self.current.set(mark.chunk);
        self.offset.set(mark.offset);
        self.oversize.get_mut().truncate(mark.oversize);
    }

    /// Return to the arena's start, dropping oversize allocations and
    /// keeping the chunk chain for reuse.
    pub fn reset(&mut self) {
        self.current.set(0);
        self.offset.set(0);
        self.oversize.get_mut().clear();
    }

    /// Bytes currently reachable by the bump cursor (diagnostics).
    pub fn allocated_bytes(&self) -> usize {
        self.current.get() * self.chunk_size + self.offset.get()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_reset() {
        let mut arena = Arena::with_chunk_size(1024);
        let a = arena.alloc_slice_fill::<u64>(8, 7);
        assert_eq!(a.len(), 8);
        assert!(a.iter().all(|&v| v == 7));
        let used = arena.allocated_bytes();
        assert!(used >= 64);
        arena.reset();
        assert_eq!(arena.allocated_bytes(), 0);
    }

    #[test]
    fn checkpoint_rewind() {
        let mut arena = Arena::with_chunk_size(1024);
        arena.alloc_slice_fill::<u32>(4, 1);
        let mark = arena.checkpoint();
        arena.alloc_slice_fill::<u32>(100, 2);
        arena.alloc_slice_fill::<u32>(100, 3);
        arena.reset_to(mark);
        assert_eq!(arena.allocated_bytes(), mark.chunk * 1024 + mark.offset);
    }

    #[test]
    fn chunk_growth_and_oversize() {
        let mut arena = Arena::with_chunk_size(256);
        // spills across several chunks
        for _ in 0..16 {
            arena.alloc_slice_fill::<u8>(100, 0xAB);
        }
        // bigger than a chunk goes to the side list
        let big = arena.alloc_slice_fill::<u8>(4096, 0xCD);
        assert_eq!(big.len(), 4096);
        assert!(big.iter().all(|&v| v == 0xCD));
        arena.reset();
        assert_eq!(arena.allocated_bytes(), 0);
    }

    #[test]
    fn strings_survive_until_reset() {
        let arena = Arena::new();
        let s = arena.alloc_str("hello world");
        assert_eq!(s, "hello world");
        let t = arena.alloc_str("");
        assert_eq!(t, "");
    }

    #[test]
    fn alignment_is_respected() {
        let arena = Arena::new();
        arena.alloc_str("x");
        let a = arena.alloc_slice_fill::<u64>(1, 0);
        assert_eq!(a.as_ptr() as usize % align_of::<u64>(), 0);
    }
}
