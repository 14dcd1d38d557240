//! The engine: the state machine tying the mapping tables, the active block
//! cache, and a [`FlashDevice`] together into a linear, byte-addressable
//! virtual store.
//!
//! Grounded directly on the reference wear-leveling engine's `readByte`,
//! `writeByte`, `activateVirtualBlock`, `flush` and `initialize` routines,
//! re-expressed over safe slices and the typed newtypes in
//! [`crate::header`] and [`crate::address`] instead of raw pointer
//! arithmetic into a memory-mapped flash bank.

use byteorder::{ByteOrder, LittleEndian};

use crate::address::{
    combine_physical, combine_virtual, split_physical, split_virtual, PhysicalAddr, VirtualAddr,
    HEADER_SIZE, PHYSICAL_BLOCK_SIZE, VIRTUAL_BLOCK_SIZE,
};
use crate::cache::ActiveBlock;
use crate::flash::FlashDevice;
use crate::header::{HeaderWord, PhysicalBlock, VirtualBlock};
use crate::mapping::MappingTables;
use crate::{trace, warn, FtlError, Result};

/// Ties a [`FlashDevice`] to the mapping tables and active block cache that
/// turn its pool of physical pages into one linear virtual address space.
///
/// `N` physical blocks back `N - 1` virtual blocks: one page is always held
/// in reserve as the destination for the next flush (invariant I3).
pub struct Engine<F: FlashDevice> {
    flash: F,
    block_count: usize,
    map: MappingTables,
    active: ActiveBlock,
}

impl<F: FlashDevice> Engine<F> {
    /// Wraps `flash`, assuming it exposes `block_count` physical pages.
    /// Infallible: the mapping tables start out empty (every entry erased)
    /// until [`Engine::initialize`] or [`Engine::format`] populates them from
    /// what is actually on the device.
    pub fn new(flash: F, block_count: usize) -> Self {
        Engine {
            flash,
            block_count,
            map: MappingTables::new(block_count),
            active: ActiveBlock::new(),
        }
    }

    /// The size, in bytes, of the virtual address space this engine exposes:
    /// `(N - 1) * VIRTUAL_BLOCK_SIZE`.
    pub fn size(&self) -> usize {
        (self.block_count - 1) * VIRTUAL_BLOCK_SIZE
    }

    /// Releases the underlying [`FlashDevice`] back to the caller.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Rebuilds the mapping tables from whatever is currently on flash.
    ///
    /// Scans every physical page's header once to populate `H`, threading a
    /// live entry into `M` for each live header found (first physical page
    /// found for a given virtual id wins; a later duplicate - the leftover of
    /// a flush torn by a power loss between writing the new copy and
    /// superseding the old one - is logged and left as a stray, non-free
    /// page rather than silently adopted). A second pass then assigns a
    /// reserved physical page to every virtual block that came up with no
    /// live header at all (first boot, or a virtual block never written).
    /// The hole-filling cursor threads across that whole second pass rather
    /// than restarting from block 0 for every virtual id, so the pass stays
    /// O(N) instead of O(N^2).
    pub fn initialize(&mut self) -> Result<()> {
        self.active = ActiveBlock::new();
        self.map = MappingTables::new(self.block_count);

        for p in 0..self.block_count {
            let header = self.read_header(PhysicalBlock(p as u16))?;
            self.map.set_header(PhysicalBlock(p as u16), header);

            if header.is_erased() {
                continue;
            }
            let id = header.block_id();
            if id as usize >= self.block_count - 1 {
                return Err(FtlError::Corrupt);
            }
            if header.is_deleted() {
                trace!("recovery: physical {} carries a superseded header", p);
                continue;
            }
            let v = VirtualBlock(id);
            if !self.map.map(v).is_free() {
                warn!(
                    "recovery: duplicate live header for virtual {} at physical {}, keeping the earlier copy",
                    id, p
                );
                continue;
            }
            self.map.set_map(v, HeaderWord::live(p as u16));
        }

        let mut cursor: u16 = 0;
        for v in 0..self.block_count - 1 {
            let vb = VirtualBlock(v as u16);
            if self.map.map(vb).is_erased() {
                let p = self
                    .map
                    .find_free_from(cursor, false)
                    .ok_or(FtlError::NoFreeBlocks)?;
                self.map.set_map(vb, HeaderWord::assigned(v as u16));
                self.map.set_header(p, HeaderWord::assigned(v as u16));
                cursor = p.0 + 1;
            }
        }

        Ok(())
    }

    /// Erases the whole device and rebuilds the mapping tables from scratch.
    pub fn format(&mut self) -> Result<()> {
        self.flash.chip_erase().map_err(|_| FtlError::Io)?;
        self.wait_while_busy();
        self.initialize()
    }

    /// `true` if the active block cache holds writes not yet committed by
    /// [`Engine::flush`].
    pub fn flush_needed(&self) -> bool {
        self.active.dirty()
    }

    /// Reads a single byte at virtual address `addr`.
    pub fn read_byte(&mut self, addr: usize) -> Result<u8> {
        if addr >= self.size() {
            return Err(FtlError::AddressOutOfRange);
        }
        let v = split_virtual(addr);
        if self.active.loaded_block() == Some(v.block) {
            Ok(self.active.payload()[v.offset as usize])
        } else {
            let p = PhysicalBlock(self.map.map(v.block).block_id());
            let phys = combine_physical(PhysicalAddr {
                block: p,
                offset: v.offset,
            });
            let mut buf = [0u8; 1];
            self.flash
                .read(phys as u64, &mut buf)
                .map_err(|_| FtlError::Io)?;
            Ok(buf[0])
        }
    }

    /// Writes a single byte at virtual address `addr`. Buffered in the
    /// active block cache until [`Engine::flush`].
    pub fn write_byte(&mut self, addr: usize, byte: u8) -> Result<()> {
        if addr >= self.size() {
            return Err(FtlError::AddressOutOfRange);
        }
        let v = split_virtual(addr);
        self.activate(v.block)?;
        self.active.payload_mut()[v.offset as usize] = byte;
        self.active.mark_dirty();
        Ok(())
    }

    /// Reads `buf.len()` bytes starting at virtual address `addr`, splitting
    /// the read across virtual block boundaries as needed.
    pub fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        if len == 0 {
            return Ok(());
        }
        if addr.checked_add(len).map_or(true, |end| end > self.size()) {
            return Err(FtlError::AddressOutOfRange);
        }

        let mut start = split_virtual(addr);
        let end = split_virtual(addr + len);
        let mut written = 0;
        while (start.block, start.offset) != (end.block, end.offset) {
            let seg_len = if end.block.0 > start.block.0 {
                VIRTUAL_BLOCK_SIZE - start.offset as usize
            } else {
                end.offset as usize - start.offset as usize
            };
            self.read_from_block(start, &mut buf[written..written + seg_len])?;
            written += seg_len;
            start = if end.block.0 > start.block.0 {
                VirtualAddr {
                    block: VirtualBlock(start.block.0 + 1),
                    offset: 0,
                }
            } else {
                VirtualAddr {
                    block: start.block,
                    offset: end.offset,
                }
            };
        }
        Ok(())
    }

    /// Writes `buf` starting at virtual address `addr`, splitting across
    /// virtual block boundaries as needed. Buffered in the active block
    /// cache until [`Engine::flush`].
    pub fn write(&mut self, addr: usize, buf: &[u8]) -> Result<()> {
        let len = buf.len();
        if len == 0 {
            return Ok(());
        }
        if addr.checked_add(len).map_or(true, |end| end > self.size()) {
            return Err(FtlError::AddressOutOfRange);
        }

        let mut start = split_virtual(addr);
        let end = split_virtual(addr + len);
        let mut pos = 0;
        while (start.block, start.offset) != (end.block, end.offset) {
            let seg_len = if end.block.0 > start.block.0 {
                VIRTUAL_BLOCK_SIZE - start.offset as usize
            } else {
                end.offset as usize - start.offset as usize
            };
            self.write_to_block(start.block, start.offset, &buf[pos..pos + seg_len])?;
            pos += seg_len;
            start = if end.block.0 > start.block.0 {
                VirtualAddr {
                    block: VirtualBlock(start.block.0 + 1),
                    offset: 0,
                }
            } else {
                VirtualAddr {
                    block: start.block,
                    offset: end.offset,
                }
            };
        }
        Ok(())
    }

    /// Commits the active block cache to flash, rotating which physical page
    /// backs the virtual block it holds.
    ///
    /// A no-op if the cache is clean. Otherwise: if the virtual block's
    /// current mapping already names a reserved-but-unwritten page (its
    /// first ever flush), that page is written directly. Otherwise a free
    /// page is found by scanning forward from just past the currently live
    /// page, wrapping around the pool; the new copy is written there, the
    /// old copy's live bit is cleared (the one legal `1 -> 0` transition a
    /// flush performs on an already-live header) and the old page is erased
    /// so it rejoins the free pool.
    ///
    /// Whichever identity the destination page carried *before* this flush
    /// claimed it - another virtual block's still-unwritten reservation, or
    /// nothing at all if it was the one truly untouched spare - moves onto
    /// the freshly erased old page, so the pool always has exactly one
    /// physical page earmarked to no virtual id at a time.
    pub fn flush(&mut self) -> Result<()> {
        if !self.active.dirty() {
            return Ok(());
        }

        let active_header = self.active.header();
        let v = VirtualBlock(active_header.block_id());
        let cur = self.map.map(v);
        let cur_p = PhysicalBlock(cur.block_id());

        let next = if cur.is_free() {
            cur_p
        } else {
            self.map
                .find_free_from(cur_p.0 + 1, true)
                .ok_or(FtlError::NoFreeBlocks)?
        };

        // capture next's prior identity before it is overwritten below
        let prior_next_header = self.map.header(next);

        let addr = next.0 as u64 * PHYSICAL_BLOCK_SIZE as u64;
        self.flash
            .write(addr, self.active.as_bytes())
            .map_err(|_| FtlError::Io)?;
        self.map.set_header(next, HeaderWord::live(v.0));
        self.map.set_map(v, HeaderWord::live(next.0));

        if next.0 != cur_p.0 {
            let superseded = cur.superseded();
            let mut raw = [0u8; HEADER_SIZE];
            LittleEndian::write_u16(&mut raw, superseded.to_raw());
            self.flash
                .write(cur_p.0 as u64 * PHYSICAL_BLOCK_SIZE as u64, &raw)
                .map_err(|_| FtlError::Io)?;

            if prior_next_header.is_erased() {
                // next was the one untouched spare; cur_p takes over that role.
                self.map.set_header(cur_p, HeaderWord::erased());
            } else {
                let displaced_v = prior_next_header.block_id();
                self.map.set_header(cur_p, HeaderWord::assigned(displaced_v));
                self.map
                    .set_map(VirtualBlock(displaced_v), HeaderWord::assigned(cur_p.0));
            }

            self.flash
                .erase_page_4k(cur_p.0 as u64 * PHYSICAL_BLOCK_SIZE as u64)
                .map_err(|_| FtlError::Io)?;
            self.wait_while_busy();
            trace!(
                "flush: virtual {} moved physical {} -> {}",
                v.0, cur_p.0, next.0
            );
        }

        self.active.clear_dirty();
        Ok(())
    }

    /// Translates a virtual address into the physical address it would
    /// occupy if every block's index equalled its own (i.e. pure arithmetic,
    /// not a lookup through the mapping tables - the inverse of
    /// [`Engine::physical_to_virtual`]).
    pub fn virtual_to_physical(&self, addr: usize) -> usize {
        let v = split_virtual(addr);
        combine_physical(PhysicalAddr {
            block: PhysicalBlock(v.block.0),
            offset: v.offset,
        })
    }

    /// The inverse of [`Engine::virtual_to_physical`]. Fails if `addr` falls
    /// inside a page's 2-byte header.
    pub fn physical_to_virtual(&self, addr: usize) -> Result<usize> {
        let p = split_physical(addr)?;
        Ok(combine_virtual(VirtualAddr {
            block: VirtualBlock(p.block.0),
            offset: p.offset,
        }))
    }

    fn read_header(&mut self, p: PhysicalBlock) -> Result<HeaderWord> {
        let mut raw = [0u8; HEADER_SIZE];
        self.flash
            .read(p.0 as u64 * PHYSICAL_BLOCK_SIZE as u64, &mut raw)
            .map_err(|_| FtlError::Io)?;
        Ok(HeaderWord::from_raw(LittleEndian::read_u16(&raw)))
    }

    /// Ensures virtual block `v` is the one currently loaded in the active
    /// buffer, flushing whatever was there first if it differs.
    fn activate(&mut self, v: VirtualBlock) -> Result<()> {
        if self.active.loaded_block() == Some(v) {
            return Ok(());
        }
        self.flush()?;

        let p = PhysicalBlock(self.map.map(v).block_id());
        let mut page = [0u8; PHYSICAL_BLOCK_SIZE];
        self.flash
            .read(p.0 as u64 * PHYSICAL_BLOCK_SIZE as u64, &mut page)
            .map_err(|_| FtlError::Io)?;
        self.active.load_bytes(&page);

        // The page may still be erased (its header reading 0xFFFF) if this is
        // the block's first activation since hole-filling reserved it; the
        // active buffer's header is the source of truth for "what is
        // currently loaded" regardless, so it is always forced live here.
        let header = HeaderWord::live(v.0);
        self.active.set_header(header);
        self.map.set_header(p, header);
        Ok(())
    }

    fn read_from_block(&mut self, start: VirtualAddr, out: &mut [u8]) -> Result<()> {
        if self.active.loaded_block() == Some(start.block) {
            let off = start.offset as usize;
            out.copy_from_slice(&self.active.payload()[off..off + out.len()]);
            Ok(())
        } else {
            let p = PhysicalBlock(self.map.map(start.block).block_id());
            let phys = combine_physical(PhysicalAddr {
                block: p,
                offset: start.offset,
            });
            self.flash.read(phys as u64, out).map_err(|_| FtlError::Io)
        }
    }

    fn write_to_block(&mut self, block: VirtualBlock, offset: u16, data: &[u8]) -> Result<()> {
        self.activate(block)?;
        let off = offset as usize;
        self.active.payload_mut()[off..off + data.len()].copy_from_slice(data);
        self.active.mark_dirty();
        Ok(())
    }

    fn wait_while_busy(&mut self) {
        while self.flash.busy() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::sim::RamFlash;

    fn engine(block_count: usize) -> Engine<RamFlash> {
        let mut e = Engine::new(RamFlash::new(block_count), block_count);
        e.format().unwrap();
        e
    }

    #[test]
    fn size_reserves_one_physical_block() {
        let e = engine(8);
        assert_eq!(e.size(), 7 * VIRTUAL_BLOCK_SIZE);
    }

    #[test]
    fn simple_write_read_without_flush() {
        let mut e = engine(4);
        e.write_byte(0, 0x42).unwrap();
        assert_eq!(e.read_byte(0).unwrap(), 0x42);
        assert!(e.flush_needed());
    }

    #[test]
    fn write_survives_flush_and_reinitialize() {
        let mut e = engine(4);
        e.write(10, b"hello").unwrap();
        e.flush().unwrap();
        assert!(!e.flush_needed());

        let mut buf = [0u8; 5];
        e.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        e.initialize().unwrap();
        let mut buf = [0u8; 5];
        e.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_spanning_two_virtual_blocks() {
        let mut e = engine(4);
        let addr = VIRTUAL_BLOCK_SIZE - 2;
        let data = [1u8, 2, 3, 4];
        e.write(addr, &data).unwrap();
        e.flush().unwrap();

        let mut buf = [0u8; 4];
        e.read(addr, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn repeated_overwrite_rotates_physical_blocks_within_bounds() {
        // N=8: the destination search cascades the displaced reservation onto
        // whichever page it frees, so all 8 physical pages absorb roughly
        // equal shares of the 1000 flushes rather than one page taking them all.
        let mut e = engine(8);
        for i in 0..1000u32 {
            e.write_byte(0, (i % 256) as u8).unwrap();
            e.flush().unwrap();
        }
        assert_eq!(e.read_byte(0).unwrap(), ((999u32) % 256) as u8);

        let flash = &e.flash;
        for p in 0..8 {
            let count = flash.erase_count(p);
            assert!(count >= 100 && count <= 200, "physical block {} erased {} times", p, count);
        }
    }

    #[test]
    fn alternating_writes_to_different_blocks_survive_reinit() {
        let mut e = engine(4);
        for round in 0..5u8 {
            e.write_byte(0, round).unwrap();
            e.write_byte(VIRTUAL_BLOCK_SIZE, round + 100).unwrap();
            e.flush().unwrap();
        }
        e.initialize().unwrap();
        assert_eq!(e.read_byte(0).unwrap(), 4);
        assert_eq!(e.read_byte(VIRTUAL_BLOCK_SIZE).unwrap(), 104);
    }

    #[test]
    fn corrupt_header_on_recovery_is_rejected() {
        let mut e = engine(4);
        // corrupt physical block 1's header to name a virtual id >= N
        let raw = e.flash.raw_mut();
        LittleEndian::write_u16(&mut raw[PHYSICAL_BLOCK_SIZE..PHYSICAL_BLOCK_SIZE + 2], 0xC00A);
        assert_eq!(e.initialize(), Err(FtlError::Corrupt));
    }

    #[test]
    fn duplicate_live_header_keeps_first_and_warns() {
        let mut e = engine(4);
        e.write_byte(0, 7).unwrap();
        e.flush().unwrap();
        // Manually stamp a second live header for virtual block 0 onto
        // whichever free page happens to be physical block 3, simulating a
        // flush torn after the new copy was written but before the old
        // copy's live bit was cleared.
        let free_p = (0..4)
            .find(|&p| p != e.map.map(VirtualBlock(0)).block_id() as usize)
            .unwrap();
        let raw = e.flash.raw_mut();
        let off = free_p * PHYSICAL_BLOCK_SIZE;
        LittleEndian::write_u16(&mut raw[off..off + 2], HeaderWord::live(0).to_raw());

        e.initialize().unwrap();
        assert_eq!(e.read_byte(0).unwrap(), 7);
    }

    #[test]
    fn reads_without_an_intervening_flush_see_buffered_writes() {
        let mut e = engine(4);
        e.write_byte(5, 1).unwrap();
        e.write_byte(VIRTUAL_BLOCK_SIZE + 5, 2).unwrap();
        assert_eq!(e.read_byte(5).unwrap(), 1);
        assert_eq!(e.read_byte(VIRTUAL_BLOCK_SIZE + 5).unwrap(), 2);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut e = engine(4);
        assert_eq!(e.read_byte(e.size()), Err(FtlError::AddressOutOfRange));
        assert_eq!(
            e.write_byte(e.size(), 0),
            Err(FtlError::AddressOutOfRange)
        );
    }

    #[test]
    fn address_translation_round_trips_through_payload() {
        let e = engine(4);
        let v = VIRTUAL_BLOCK_SIZE + 3;
        let p = e.virtual_to_physical(v);
        assert_eq!(e.physical_to_virtual(p).unwrap(), v);
        assert_eq!(
            e.physical_to_virtual(PHYSICAL_BLOCK_SIZE),
            Err(FtlError::AddressNotInPayload)
        );
    }
}
