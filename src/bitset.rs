// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Small growable bit set shared by the send-mask and pending-notification bitmap
//! OWNERS: @kernel-team
//! PUBLIC API: Bitset
//! DEPENDS_ON: nothing else in this crate
//! INVARIANTS: capacity is fixed at construction; all indices passed in must be < capacity
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Generalizes the source's `sys_map_t`/chunk-array bitmap (`set_sys_bit`,
//! `get_sys_bit`, `alloc_bit`, `free_bit`) into one reusable type used both for
//! the per-receiver pending-notification bitmap and for the privilege send-mask.

#[derive(Clone, Debug)]
pub struct Bitset {
    words: Vec<u64>,
    capacity: usize,
}

impl Bitset {
    pub fn new(capacity: usize) -> Self {
        let words = (capacity + 63) / 64;
        Self { words: vec![0u64; words.max(1)], capacity }
    }

    /// A bitset of the given capacity with every bit already set, for
    /// privilege tables where the default policy is "allowed" (e.g. a fresh
    /// process's send-mask, which the source initializes permissive and
    /// narrows per-task).
    pub fn new_full(capacity: usize) -> Self {
        let mut bs = Self::new(capacity);
        for i in 0..capacity {
            bs.set(i);
        }
        bs
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.capacity, "bitset index out of range");
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.capacity, "bitset index out of range");
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.capacity, "bitset index out of range");
        (self.words[index / 64] >> (index % 64)) & 1 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// The lowest set bit at or after `start`, scanning in ascending index order
    /// (the source's chunk-by-chunk, bit-by-bit scan in `mini_receive`).
    pub fn first_set_from(&self, start: usize) -> Option<usize> {
        let mut i = start;
        while i < self.capacity {
            let word = self.words[i / 64];
            let shifted = word >> (i % 64);
            if shifted == 0 {
                // Nothing left in this word; jump to the next word boundary.
                i = (i / 64 + 1) * 64;
                continue;
            }
            let offset = shifted.trailing_zeros() as usize;
            let found = i + offset;
            if found >= self.capacity {
                return None;
            }
            return Some(found);
        }
        None
    }

    /// Allocates the first clear bit and sets it, returning its index (the
    /// source's `alloc_bit`). Returns `None` if the set is full.
    pub fn alloc_first_clear(&mut self) -> Option<usize> {
        for i in 0..self.capacity {
            if !self.get(i) {
                self.set(i);
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_get_roundtrip() {
        let mut bs = Bitset::new(130);
        assert!(bs.is_empty());
        bs.set(5);
        bs.set(64);
        bs.set(129);
        assert!(bs.get(5));
        assert!(bs.get(64));
        assert!(bs.get(129));
        assert!(!bs.get(6));
        bs.clear(64);
        assert!(!bs.get(64));
    }

    #[test]
    fn first_set_from_scans_ascending() {
        let mut bs = Bitset::new(200);
        bs.set(70);
        bs.set(5);
        bs.set(150);
        assert_eq!(bs.first_set_from(0), Some(5));
        assert_eq!(bs.first_set_from(6), Some(70));
        assert_eq!(bs.first_set_from(71), Some(150));
        assert_eq!(bs.first_set_from(151), None);
    }

    #[test]
    fn alloc_first_clear_fills_in_order_then_exhausts() {
        let mut bs = Bitset::new(3);
        assert_eq!(bs.alloc_first_clear(), Some(0));
        assert_eq!(bs.alloc_first_clear(), Some(1));
        assert_eq!(bs.alloc_first_clear(), Some(2));
        assert_eq!(bs.alloc_first_clear(), None);
    }
}
