//! Best-fit free-list allocator living inside a shared data segment.
//!
//! Layout: a `SegmentHeader` at offset 0, a zero-size sentinel `FreeBlock`
//! right after it, then the managed area. The free list is a singly-linked
//! chain of offsets sorted by position, which keeps it valid in every
//! process no matter where the segment is mapped. An allocated block keeps
//! its size in its first four bytes; the offset handed to callers points
//! just past that prefix, so offset 0 can never name a live allocation.
//!
//! All mutation happens under the cache's write lock; the allocator has no
//! lock of its own.

use std::mem::size_of;
use std::ptr;

pub const HEADER_SIZE: i32 = size_of::<SegmentHeader>() as i32;
const BLOCK_SIZE: i32 = size_of::<FreeBlock>() as i32;
const SIZE_PREFIX: i32 = size_of::<i32>() as i32;
const WORD: i32 = 8;

/// Fixed overhead a segment cannot hand out: header, sentinel, size prefix.
pub const SEGMENT_OVERHEAD: i32 = HEADER_SIZE + BLOCK_SIZE + SIZE_PREFIX;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segsize: i32,
    pub avail: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FreeBlock {
    size: i32,
    next: i32,
}

/// Size rounding applied before the free-list walk.
///
/// `Pow2` rounds the block size up to a power of two, which raises the odds
/// that freed neighbors fall into the same size class and coalesce. Requests
/// whose rounded size would exceed half the segment skip the rounding; a
/// payload sized near the segment itself must still be placeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPolicy {
    Exact,
    Pow2,
}

/// A view of one attached segment's allocator state.
#[derive(Clone, Copy)]
pub struct Segment {
    base: *mut u8,
}

fn align_word(value: i32) -> i32 {
    (value + WORD - 1) & !(WORD - 1)
}

// Returns `value` unchanged if the next power of two would overflow the
// sign bit; the caller's half-segment ceiling then rejects the rounding.
fn next_pow2(value: i32) -> i32 {
    let mut p = 1;
    while p < value {
        p = match p.checked_mul(2) {
            Some(next) => next,
            None => return value,
        };
    }
    p
}

impl Segment {
    /// # Safety
    ///
    /// `base` must point at a mapping at least `segsize` bytes long that
    /// stays valid for the lifetime of this value and all its copies.
    pub unsafe fn from_raw(base: *mut u8) -> Self {
        Self { base }
    }

    /// Writes a fresh header and free list covering the whole segment.
    pub fn init(&self, segsize: i32) {
        let avail = segsize - SEGMENT_OVERHEAD;
        self.write_header(SegmentHeader { segsize, avail });
        self.write_block(
            HEADER_SIZE,
            FreeBlock {
                size: 0,
                next: HEADER_SIZE + BLOCK_SIZE,
            },
        );
        self.write_block(
            HEADER_SIZE + BLOCK_SIZE,
            FreeBlock {
                size: avail,
                next: 0,
            },
        );
    }

    pub fn header(&self) -> SegmentHeader {
        unsafe { ptr::read_unaligned(self.base as *const SegmentHeader) }
    }

    /// Pointer to the payload bytes behind an offset returned by `allocate`.
    pub fn data_ptr(&self, offset: i32) -> *mut u8 {
        unsafe { self.base.add(offset as usize) }
    }

    /// Reserves `size` bytes and returns their offset, or `None` when no
    /// free block can hold them. A failed call mutates nothing.
    pub fn allocate(&self, size: i32, policy: RoundPolicy) -> Option<i32> {
        let header = self.header();
        let mut realsize = align_word((size + SIZE_PREFIX).max(BLOCK_SIZE));
        if policy == RoundPolicy::Pow2 {
            let rounded = next_pow2(realsize);
            if rounded <= header.segsize / 2 {
                realsize = rounded;
            }
        }

        if header.avail < realsize {
            return None;
        }

        // Walk for the smallest block that can be split, or stop early on
        // an exact fit. Ties keep the first (lowest-offset) candidate, which
        // packs allocations low and preserves large free regions high.
        let mut best_prv: Option<i32> = None;
        let mut min_size = i32::MAX;
        let mut prv_off = HEADER_SIZE;
        loop {
            let prv = self.block(prv_off);
            if prv.next == 0 {
                break;
            }
            let cur = self.block(prv.next);
            if cur.size == realsize {
                best_prv = Some(prv_off);
                break;
            } else if cur.size > BLOCK_SIZE + realsize && cur.size < min_size {
                best_prv = Some(prv_off);
                min_size = cur.size;
            }
            prv_off = prv.next;
        }

        let prv_off = best_prv?;
        let mut prv = self.block(prv_off);
        let cur_off = prv.next;
        let cur = self.block(cur_off);

        self.write_header(SegmentHeader {
            segsize: header.segsize,
            avail: header.avail - realsize,
        });

        if cur.size == realsize {
            prv.next = cur.next;
            self.write_block(prv_off, prv);
        } else {
            let remainder_off = cur_off + realsize;
            self.write_block(
                remainder_off,
                FreeBlock {
                    size: cur.size - realsize,
                    next: cur.next,
                },
            );
            prv.next = remainder_off;
            self.write_block(prv_off, prv);
            self.write_block(
                cur_off,
                FreeBlock {
                    size: realsize,
                    next: cur.next,
                },
            );
        }

        Some(cur_off + SIZE_PREFIX)
    }

    /// Returns a block to the free list, coalescing with adjacent free
    /// neighbors. `user_offset` must have come from `allocate` on this
    /// segment; non-positive offsets are ignored.
    pub fn deallocate(&self, user_offset: i32) {
        let offset = user_offset - SIZE_PREFIX;
        if offset < 0 {
            return;
        }

        // Find the free block preceding the returned one; the list stays
        // sorted by offset so adjacency checks below are local.
        let mut prv_off = HEADER_SIZE;
        loop {
            let prv = self.block(prv_off);
            if prv.next != 0 && prv.next < offset {
                prv_off = prv.next;
            } else {
                break;
            }
        }

        let prv = self.block(prv_off);
        let size = self.block(offset).size;
        self.write_block(offset, FreeBlock { size, next: prv.next });
        self.write_block(
            prv_off,
            FreeBlock {
                size: prv.size,
                next: offset,
            },
        );

        let header = self.header();
        self.write_header(SegmentHeader {
            segsize: header.segsize,
            avail: header.avail + size,
        });

        let mut cur_off = offset;
        let prv = self.block(prv_off);
        if prv_off + prv.size == cur_off {
            let cur = self.block(cur_off);
            self.write_block(
                prv_off,
                FreeBlock {
                    size: prv.size + cur.size,
                    next: cur.next,
                },
            );
            cur_off = prv_off;
        }

        let cur = self.block(cur_off);
        if cur.next != 0 && cur_off + cur.size == cur.next {
            let nxt = self.block(cur.next);
            self.write_block(
                cur_off,
                FreeBlock {
                    size: cur.size + nxt.size,
                    next: nxt.next,
                },
            );
        }
    }

    /// Total and available byte counts for stats reporting.
    pub fn memory_info(&self) -> (i32, i32) {
        let header = self.header();
        (header.segsize, header.avail)
    }

    fn block(&self, offset: i32) -> FreeBlock {
        unsafe { ptr::read_unaligned(self.base.add(offset as usize) as *const FreeBlock) }
    }

    fn write_block(&self, offset: i32, block: FreeBlock) {
        unsafe {
            ptr::write_unaligned(self.base.add(offset as usize) as *mut FreeBlock, block);
        }
    }

    fn write_header(&self, header: SegmentHeader) {
        unsafe {
            ptr::write_unaligned(self.base as *mut SegmentHeader, header);
        }
    }

    #[cfg(test)]
    fn free_blocks(&self) -> Vec<(i32, i32)> {
        let mut blocks = Vec::new();
        let mut offset = self.block(HEADER_SIZE).next;
        while offset != 0 {
            let block = self.block(offset);
            blocks.push((offset, block.size));
            offset = block.next;
        }
        blocks
    }
}
