//! Pure address arithmetic.
//!
//! These functions are the only place that encodes the convention that every
//! physical page reserves its first two bytes for a [`crate::header::HeaderWord`];
//! everything above this module deals exclusively in virtual addresses or in
//! already-split `(block, offset)` pairs.

use crate::header::{PhysicalBlock, VirtualBlock};
use crate::{FtlError, Result};

/// Payload bytes per virtual block (4096-byte physical page minus its 2-byte header).
pub const VIRTUAL_BLOCK_SIZE: usize = 4094;
/// Bytes per physical page, the flash device's erase granularity.
pub const PHYSICAL_BLOCK_SIZE: usize = 4096;
/// Size in bytes of the persistent header word at the start of every physical page.
pub const HEADER_SIZE: usize = 2;

/// A virtual address split into its owning block and the offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddr {
    pub block: VirtualBlock,
    pub offset: u16,
}

/// A physical address split into its owning page and the offset within the
/// page's payload area (i.e. already shifted past the 2-byte header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddr {
    pub block: PhysicalBlock,
    pub offset: u16,
}

/// Splits a linear virtual address into `(block, offset)`.
///
/// `block = addr / VIRTUAL_BLOCK_SIZE`, `offset = addr % VIRTUAL_BLOCK_SIZE`.
pub fn split_virtual(addr: usize) -> VirtualAddr {
    let block = addr / VIRTUAL_BLOCK_SIZE;
    let offset = addr - block * VIRTUAL_BLOCK_SIZE;
    VirtualAddr {
        block: VirtualBlock(block as u16),
        offset: offset as u16,
    }
}

/// Recombines a split virtual address into its linear form.
pub fn combine_virtual(info: VirtualAddr) -> usize {
    info.block.0 as usize * VIRTUAL_BLOCK_SIZE + info.offset as usize
}

/// Splits a linear physical address into `(block, payload offset)`.
///
/// Fails with [`FtlError::AddressNotInPayload`] if `addr % PHYSICAL_BLOCK_SIZE`
/// lies within the first two (header) bytes of the page.
pub fn split_physical(addr: usize) -> Result<PhysicalAddr> {
    let block = addr / PHYSICAL_BLOCK_SIZE;
    let raw_offset = addr - block * PHYSICAL_BLOCK_SIZE;
    if raw_offset < HEADER_SIZE {
        return Err(FtlError::AddressNotInPayload);
    }
    Ok(PhysicalAddr {
        block: PhysicalBlock(block as u16),
        offset: (raw_offset - HEADER_SIZE) as u16,
    })
}

/// Recombines a split physical (payload) address into its linear form,
/// re-adding the 2-byte header offset.
pub fn combine_physical(info: PhysicalAddr) -> usize {
    info.block.0 as usize * PHYSICAL_BLOCK_SIZE + info.offset as usize + HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_combine_virtual_roundtrip() {
        for addr in [0usize, 1, 4093, 4094, 4095, 8188, 100_000] {
            let split = split_virtual(addr);
            assert_eq!(combine_virtual(split), addr);
        }
    }

    #[test]
    fn split_virtual_block_boundaries() {
        let a = split_virtual(4094);
        assert_eq!(a.block, VirtualBlock(1));
        assert_eq!(a.offset, 0);

        let b = split_virtual(4093);
        assert_eq!(b.block, VirtualBlock(0));
        assert_eq!(b.offset, 4093);
    }

    #[test]
    fn split_physical_rejects_header_bytes() {
        assert_eq!(split_physical(0), Err(FtlError::AddressNotInPayload));
        assert_eq!(split_physical(1), Err(FtlError::AddressNotInPayload));
        assert_eq!(split_physical(4096), Err(FtlError::AddressNotInPayload));
        assert!(split_physical(2).is_ok());
    }

    #[test]
    fn split_combine_physical_roundtrip() {
        for addr in [2usize, 3, 4095, 4098, 8191, 200_002] {
            let split = split_physical(addr).unwrap();
            assert_eq!(combine_physical(split), addr);
        }
    }

    #[test]
    fn combine_physical_reserves_header() {
        let info = PhysicalAddr {
            block: PhysicalBlock(2),
            offset: 0,
        };
        assert_eq!(combine_physical(info), 2 * PHYSICAL_BLOCK_SIZE + HEADER_SIZE);
    }
}
