//! A micro-architecture agnostic wear-leveling flash translation layer (FTL)
//! for NOR-flash devices, written in pure Rust.
//!
//! The crate exposes a linear, byte-addressable virtual address space backed
//! by a pool of 4096-byte physical flash pages. Writes are buffered in a
//! single active-block cache and committed on [`engine::Engine::flush`], which
//! rotates the physical page backing a virtual block across the pool so that
//! repeated writes to one logical address do not wear out a single physical
//! page.
//!
//! The underlying flash bus protocol, JEDEC identification, and any
//! command-line or serial-port tooling are out of scope: the crate only
//! consumes a byte-granular [`flash::FlashDevice`] and never talks to
//! hardware registers itself.
#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![allow(non_snake_case)]

extern crate alloc;

pub mod address;
pub mod cache;
pub mod engine;
pub mod flash;
pub mod header;
pub mod mapping;

use core::fmt;

/// The error type produced by every fallible operation in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum FtlError {
    /// The underlying [`flash::FlashDevice`] reported a failure. The engine's
    /// in-RAM state is conservatively treated as stale until re-initialized.
    Io,
    /// A header word read during `initialize` encoded a `block_id` that is
    /// not `< N`. The medium should be `format`-ed and retried.
    Corrupt,
    /// The spare-block invariant (at least one free physical page) was
    /// violated: either `N` virtual blocks were configured instead of
    /// `N - 1`, or the mapping tables have a logic error.
    NoFreeBlocks,
    /// A read or write addressed a byte beyond [`engine::Engine::size`].
    AddressOutOfRange,
    /// A physical address passed to [`engine::Engine::physical_to_virtual`]
    /// fell inside a page's 2-byte header, which is not part of the mapped
    /// payload area.
    AddressNotInPayload,
}

impl fmt::Display for FtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtlError::Io => write!(f, "flash device reported an I/O failure"),
            FtlError::Corrupt => write!(f, "on-flash header references a block id >= N"),
            FtlError::NoFreeBlocks => write!(f, "no free physical block available"),
            FtlError::AddressOutOfRange => write!(f, "address is beyond the virtual address space"),
            FtlError::AddressNotInPayload => write!(f, "address falls inside a page header"),
        }
    }
}

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, FtlError>;

/// Forwards to whichever logging backend is active, mirroring the `defmt`
/// feature's own level-gating convention (`defmt-trace`, `defmt-debug`, ...).
/// Falls back to `log` when `defmt` is not enabled, and is a no-op otherwise.
macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        log::trace!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ();
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        log::warn!($($arg)*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ();
    }};
}

pub(crate) use trace;
pub(crate) use warn;
