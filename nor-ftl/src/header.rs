//! The persistent header word and the virtual/physical block id newtypes.
//!
//! This is a safe re-expression of the original `BLOCK_ID`/`BLOCK_DELETED`/
//! `BLOCK_IS_FREE` bit-twiddling macros: bits 0-13 of a header word name a
//! virtual block, bit 14 is reserved (always written `1`), and bit 15 is the
//! live bit. The all-ones value `0xFFFF` denotes an erased, never-written page.

/// Bit 15: set means the page holds the authoritative copy of its block.
const LIVE_BIT: u16 = 0x8000;
/// Bit 14: reserved, must always be written as `1`.
const RESERVED_BIT: u16 = 0x4000;
/// Bits 0-13: the virtual block id.
const BLOCK_ID_MASK: u16 = 0x3FFF;
/// The sentinel for an erased (never-written) page.
pub const ERASED_HEADER: u16 = 0xFFFF;

/// A virtual block index, `< N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VirtualBlock(pub u16);

/// A physical block index, `< N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhysicalBlock(pub u16);

/// A 16-bit header word: either the sentinel `0xFFFF` (erased), or a
/// `block_id` packed with the reserved bit and the live bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderWord(u16);

impl HeaderWord {
    /// Wraps a raw 16-bit value as read from (or about to be written to) flash.
    pub fn from_raw(raw: u16) -> Self {
        HeaderWord(raw)
    }

    /// Returns the raw 16-bit value, suitable for a little-endian write to flash.
    pub fn to_raw(self) -> u16 {
        self.0
    }

    /// The erased-page sentinel.
    pub fn erased() -> Self {
        HeaderWord(ERASED_HEADER)
    }

    /// Builds a header marking `id` live (bit 15 set, reserved bit set).
    pub fn live(id: u16) -> Self {
        debug_assert!(id & !BLOCK_ID_MASK == 0, "block id does not fit in 14 bits");
        HeaderWord((id & BLOCK_ID_MASK) | RESERVED_BIT | LIVE_BIT)
    }

    /// Builds a header marking `id` as *assigned but unused* (live bit clear).
    /// This is the state a virtual block is in right after hole-filling, before
    /// its first write, or a physical page right after it has taken over the
    /// identity of a virtual block during a flush's supersede step.
    pub fn assigned(id: u16) -> Self {
        debug_assert!(id & !BLOCK_ID_MASK == 0, "block id does not fit in 14 bits");
        HeaderWord((id & BLOCK_ID_MASK) | RESERVED_BIT)
    }

    /// The virtual block id this header names (bits 0-13).
    pub fn block_id(self) -> u16 {
        self.0 & BLOCK_ID_MASK
    }

    /// `true` when bit 15 is clear, i.e. the page has been superseded and is
    /// awaiting erase (or was never live to begin with).
    pub fn is_deleted(self) -> bool {
        self.0 & LIVE_BIT == 0
    }

    /// `true` when bit 15 is set: this page holds the authoritative copy.
    pub fn is_live(self) -> bool {
        !self.is_deleted()
    }

    /// A page is free if it has never been written (`0xFFFF`) or has been
    /// superseded (live bit clear).
    pub fn is_free(self) -> bool {
        self.0 == ERASED_HEADER || self.is_deleted()
    }

    /// `true` only for the raw erased sentinel, as distinct from a page that
    /// has been assigned or superseded (both of which also read as free).
    pub fn is_erased(self) -> bool {
        self.0 == ERASED_HEADER
    }

    /// Clears the live bit, the single legal 1->0 transition used to mark a
    /// page superseded-awaiting-erase. Safe to call on an already-deleted or
    /// erased header (idempotent).
    pub fn superseded(self) -> Self {
        HeaderWord(self.0 & !LIVE_BIT)
    }
}

impl From<u16> for HeaderWord {
    fn from(raw: u16) -> Self {
        HeaderWord::from_raw(raw)
    }
}

impl From<HeaderWord> for u16 {
    fn from(h: HeaderWord) -> Self {
        h.to_raw()
    }
}
