//! The active block cache: a single 4096-byte RAM buffer holding the working
//! copy of one virtual block, plus the dirty flag that tracks whether it
//! holds writes not yet committed to flash.
//!
//! The buffer's first two bytes *are* the authoritative header for whichever
//! virtual block is currently loaded - there is no separate "which block is
//! active" field to keep in sync.

use byteorder::{ByteOrder, LittleEndian};

use crate::address::PHYSICAL_BLOCK_SIZE;
use crate::header::{HeaderWord, VirtualBlock};

/// A 4096-byte RAM buffer shadowing one physical page: bytes `0..2` are the
/// header, bytes `2..4096` are the payload.
pub struct ActiveBlock {
    buf: [u8; PHYSICAL_BLOCK_SIZE],
    dirty: bool,
}

impl ActiveBlock {
    /// A freshly erased buffer: header reads as free, nothing active, clean.
    pub fn new() -> Self {
        ActiveBlock {
            buf: [0xFF; PHYSICAL_BLOCK_SIZE],
            dirty: false,
        }
    }

    /// The header word currently shadowed by the buffer.
    pub fn header(&self) -> HeaderWord {
        HeaderWord::from_raw(LittleEndian::read_u16(&self.buf[0..2]))
    }

    /// Overwrites the shadowed header word, e.g. to correct a freshly loaded
    /// erased page's header into a live one.
    pub fn set_header(&mut self, header: HeaderWord) {
        LittleEndian::write_u16(&mut self.buf[0..2], header.to_raw());
    }

    /// The virtual block this buffer is currently loaded for, if its header
    /// is not free (i.e. it names a real block rather than reading as erased
    /// or superseded).
    pub fn loaded_block(&self) -> Option<VirtualBlock> {
        let h = self.header();
        if h.is_free() {
            None
        } else {
            Some(VirtualBlock(h.block_id()))
        }
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// The 4094-byte payload area, read-only.
    pub fn payload(&self) -> &[u8] {
        &self.buf[2..]
    }

    /// The 4094-byte payload area, mutable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[2..]
    }

    /// The whole 4096-byte buffer (header + payload), as written verbatim to
    /// flash on a fresh-page flush.
    pub fn as_bytes(&self) -> &[u8; PHYSICAL_BLOCK_SIZE] {
        &self.buf
    }

    /// Replaces the whole buffer's contents, e.g. after reading a physical
    /// page in from flash during `activate`.
    pub fn load_bytes(&mut self, bytes: &[u8; PHYSICAL_BLOCK_SIZE]) {
        self.buf.copy_from_slice(bytes);
    }
}

impl Default for ActiveBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_reads_as_free_and_clean() {
        let a = ActiveBlock::new();
        assert!(a.header().is_free());
        assert_eq!(a.loaded_block(), None);
        assert!(!a.dirty());
    }

    #[test]
    fn set_header_changes_loaded_block() {
        let mut a = ActiveBlock::new();
        a.set_header(HeaderWord::live(5));
        assert_eq!(a.loaded_block(), Some(VirtualBlock(5)));
    }

    #[test]
    fn payload_writes_are_visible_through_as_bytes() {
        let mut a = ActiveBlock::new();
        a.payload_mut()[0] = 0x42;
        a.mark_dirty();
        assert_eq!(a.as_bytes()[2], 0x42);
        assert!(a.dirty());
        a.clear_dirty();
        assert!(!a.dirty());
    }

    #[test]
    fn load_bytes_replaces_header_and_payload() {
        let mut a = ActiveBlock::new();
        let mut page = [0u8; PHYSICAL_BLOCK_SIZE];
        LittleEndian::write_u16(&mut page[0..2], HeaderWord::live(9).to_raw());
        page[2] = 0x7;
        a.load_bytes(&page);
        assert_eq!(a.loaded_block(), Some(VirtualBlock(9)));
        assert_eq!(a.payload()[0], 0x7);
    }
}
