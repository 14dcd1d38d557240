//! The two in-RAM mapping tables: `M` (virtual -> physical) and `H`
//! (physical -> virtual, a cache of every physical page's on-flash header).
//!
//! `M` and `H` are mutually inverse on live entries (invariant I1 in the
//! design doc): for a virtual block backed by a live physical page `p`,
//! `M[v]` encodes `p` with the live bit set, and `H[p]` encodes `v` with the
//! live bit set. Unwritten virtual blocks point at a *reserved* physical page
//! whose header is still erased on flash but whose cached entry in `H`
//! already carries the assignment (live bit clear).

use alloc::vec;
use alloc::vec::Vec;

use crate::header::{HeaderWord, PhysicalBlock, VirtualBlock};

/// Owns the virtual-to-physical map and the physical-header cache, sized at
/// construction to the configured block count `N`.
#[derive(Debug)]
pub struct MappingTables {
    /// `M[v]`: which physical block currently backs virtual block `v`.
    block_map: Vec<HeaderWord>,
    /// `H[p]`: the cached header word of physical block `p`.
    header_cache: Vec<HeaderWord>,
}

impl MappingTables {
    /// Allocates both tables for `block_count` blocks, filled with the
    /// erased sentinel (i.e. "nothing is mapped yet").
    pub fn new(block_count: usize) -> Self {
        MappingTables {
            block_map: vec![HeaderWord::erased(); block_count],
            header_cache: vec![HeaderWord::erased(); block_count],
        }
    }

    /// Number of blocks (`N`) this instance was constructed with.
    pub fn len(&self) -> usize {
        self.block_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_map.is_empty()
    }

    pub fn map(&self, v: VirtualBlock) -> HeaderWord {
        self.block_map[v.0 as usize]
    }

    pub fn set_map(&mut self, v: VirtualBlock, h: HeaderWord) {
        self.block_map[v.0 as usize] = h;
    }

    pub fn header(&self, p: PhysicalBlock) -> HeaderWord {
        self.header_cache[p.0 as usize]
    }

    pub fn set_header(&mut self, p: PhysicalBlock, h: HeaderWord) {
        self.header_cache[p.0 as usize] = h;
    }

    /// Scans `H` for the first free physical block starting at `start`
    /// (inclusive). If `wrap` is set and no free block is found in
    /// `start..N`, continues scanning `0..start`.
    ///
    /// Used both by `initialize`'s hole-filling pass (`wrap = false`, with a
    /// cursor that advances across calls so the whole pass stays O(N)) and by
    /// `flush`'s destination search (`wrap = true`, starting just past the
    /// block currently backing the virtual id being flushed).
    pub fn find_free_from(&self, start: u16, wrap: bool) -> Option<PhysicalBlock> {
        let n = self.header_cache.len() as u16;
        let start = if start >= n { 0 } else { start };
        for p in start..n {
            if self.header_cache[p as usize].is_free() {
                return Some(PhysicalBlock(p));
            }
        }
        if wrap {
            for p in 0..start {
                if self.header_cache[p as usize].is_free() {
                    return Some(PhysicalBlock(p));
                }
            }
        }
        None
    }

    /// `true` if at least one physical block is free (invariant I3, the spare).
    pub fn has_spare(&self) -> bool {
        self.header_cache.iter().any(|h| h.is_free())
    }
}
