//! The flash device adapter boundary: the one polymorphism point the engine
//! needs. Bus commands, timing, JEDEC identification, and status polling are
//! all the adapter's concern, not the engine's - it only ever calls the four
//! operations below, blocking and synchronous from its point of view.

use crate::address::PHYSICAL_BLOCK_SIZE;

/// A byte-granular NOR-flash device, as consumed by [`crate::engine::Engine`].
///
/// Implementors must honor NOR-flash write semantics: [`FlashDevice::write`]
/// may only clear bits (`1 -> 0`); restoring a bit to `1` requires
/// [`FlashDevice::erase_page_4k`] or [`FlashDevice::chip_erase`], which reset
/// an entire 4096-byte page to `0xFF`.
pub trait FlashDevice {
    /// The adapter's own failure type; collapsed to `FtlError::Io` by the engine.
    type Error;

    /// Fills `buf` with `buf.len()` bytes read starting at `addr`.
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// AND-merges `buf` into storage starting at `addr`: only bits going
    /// `1 -> 0` take effect, bits already `0` stay `0`.
    fn write(&mut self, addr: u64, buf: &[u8]) -> Result<(), Self::Error>;

    /// Resets the 4096-byte page containing `addr` to all `0xFF`. `addr` is
    /// always page-aligned when the engine calls this.
    fn erase_page_4k(&mut self, addr: u64) -> Result<(), Self::Error>;

    /// Erases the whole device.
    fn chip_erase(&mut self) -> Result<(), Self::Error>;

    /// `true` while an erase issued by `erase_page_4k`/`chip_erase` is still
    /// in progress. The engine polls this in a tight loop after issuing an
    /// erase; it introduces no timeouts or cancellation of its own.
    fn busy(&mut self) -> bool;
}

/// An in-memory [`FlashDevice`] used for testing, grounded on the reference
/// `DummyFlash` test double: it enforces the hardware-accurate AND-merge write
/// rule and counts erases per page so wear-rotation can be asserted on.
#[cfg(any(test, feature = "sim"))]
pub mod sim {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// An always-available, never-busy in-memory NOR-flash simulator.
    pub struct RamFlash {
        data: Vec<u8>,
        erase_count: Vec<u32>,
        block_count: usize,
    }

    impl RamFlash {
        /// Allocates `block_count` pages of 4096 bytes each, all erased.
        pub fn new(block_count: usize) -> Self {
            RamFlash {
                data: vec![0xFF; block_count * PHYSICAL_BLOCK_SIZE],
                erase_count: vec![0; block_count],
                block_count,
            }
        }

        /// Number of times physical page `block` has been erased since creation.
        pub fn erase_count(&self, block: usize) -> u32 {
            self.erase_count[block]
        }

        /// The raw backing store, for test assertions that peek at on-flash
        /// header bytes directly.
        pub fn raw(&self) -> &[u8] {
            &self.data
        }

        /// Mutable access to the raw backing store, for tests that need to
        /// inject a corrupt header without going through the write-AND-merge
        /// path.
        pub fn raw_mut(&mut self) -> &mut [u8] {
            &mut self.data
        }
    }

    impl FlashDevice for RamFlash {
        type Error = core::convert::Infallible;

        fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
            let addr = addr as usize;
            buf.copy_from_slice(&self.data[addr..addr + buf.len()]);
            Ok(())
        }

        fn write(&mut self, addr: u64, buf: &[u8]) -> Result<(), Self::Error> {
            let addr = addr as usize;
            for (i, byte) in buf.iter().enumerate() {
                // hardware AND semantics: only 1->0 transitions are legal
                self.data[addr + i] &= *byte;
            }
            Ok(())
        }

        fn erase_page_4k(&mut self, addr: u64) -> Result<(), Self::Error> {
            let block = addr as usize / PHYSICAL_BLOCK_SIZE;
            let start = block * PHYSICAL_BLOCK_SIZE;
            self.data[start..start + PHYSICAL_BLOCK_SIZE].fill(0xFF);
            self.erase_count[block] += 1;
            Ok(())
        }

        fn chip_erase(&mut self) -> Result<(), Self::Error> {
            for block in 0..self.block_count {
                self.erase_page_4k((block * PHYSICAL_BLOCK_SIZE) as u64)?;
            }
            Ok(())
        }

        fn busy(&mut self) -> bool {
            false
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn write_only_clears_bits() {
            let mut f = RamFlash::new(1);
            f.write(0, &[0b1010_1010]).unwrap();
            // writing 0b1111_0000 should AND, not overwrite
            f.write(0, &[0b1111_0000]).unwrap();
            let mut buf = [0u8; 1];
            f.read(0, &mut buf).unwrap();
            assert_eq!(buf[0], 0b1010_1010 & 0b1111_0000);
        }

        #[test]
        fn erase_resets_to_0xff_and_counts() {
            let mut f = RamFlash::new(2);
            f.write(0, &[0x00]).unwrap();
            assert_eq!(f.erase_count(0), 0);
            f.erase_page_4k(0).unwrap();
            let mut buf = [0u8; 1];
            f.read(0, &mut buf).unwrap();
            assert_eq!(buf[0], 0xFF);
            assert_eq!(f.erase_count(0), 1);
            assert_eq!(f.erase_count(1), 0);
        }

        #[test]
        fn chip_erase_touches_every_page() {
            let mut f = RamFlash::new(3);
            f.chip_erase().unwrap();
            assert_eq!(f.erase_count(0), 1);
            assert_eq!(f.erase_count(1), 1);
            assert_eq!(f.erase_count(2), 1);
        }

        #[test]
        fn never_busy() {
            let mut f = RamFlash::new(1);
            assert!(!f.busy());
        }
    }
}
