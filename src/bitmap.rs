//! Fixed-width bitmaps used at every level of the tree.
//!
//! A set bit means *free* and a cleared bit means *allocated*. Inverting the
//! usual convention lets "find the lowest free index" be a plain
//! first-one search, and a freshly created bitmap is all-free.

use bitvec::prelude::*;

/// A `block_size`-wide bit vector where `1` is free and `0` is allocated.
#[derive(Clone, PartialEq, Eq)]
pub struct BitMap {
    bits: BitVec<u32, Lsb0>,
}

impl BitMap {
    /// Creates an all-free bitmap of `width` bits.
    pub fn new(width: usize) -> Self {
        Self {
            bits: BitVec::repeat(true, width),
        }
    }

    /// Number of bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn mark_allocated(&mut self, index: usize) {
        self.bits.set(index, false);
    }

    #[inline]
    pub fn mark_free(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    /// Returns `true` if `index` is allocated. Out of range indices are free.
    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        self.bits.get(index).map_or(false, |bit| !*bit)
    }

    #[inline]
    pub fn is_fully_allocated(&self) -> bool {
        self.bits.not_any()
    }

    #[inline]
    pub fn is_fully_free(&self) -> bool {
        self.bits.all()
    }

    /// Lowest free index, or `None` when every bit is allocated.
    #[inline]
    pub fn lowest_free(&self) -> Option<usize> {
        self.bits.first_one()
    }

    /// Number of free bits.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.bits.count_ones()
    }
}

impl std::fmt::Debug for BitMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Allocated bits render as `1` so the output reads like an occupancy map.
        let occupancy: String = self
            .bits
            .iter()
            .by_vals()
            .map(|free| if free { '0' } else { '1' })
            .collect();
        f.debug_tuple("BitMap").field(&occupancy).finish()
    }
}
