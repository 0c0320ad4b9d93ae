//! JEDEC SPI NOR opcodes used by the loader

use bitflags::bitflags;

// Write control

/// Write Enable - required before any program/erase operation
pub const WREN: u8 = 0x06;
/// Write Disable - clears the WEL bit
pub const WRDI: u8 = 0x04;

// Status

/// Read Status Register 1
pub const RDSR: u8 = 0x05;

// Identification

/// Read JEDEC ID (manufacturer + 2-byte device ID)
pub const RDID: u8 = 0x9F;

// Read

/// Read Data, no dummy cycles
pub const READ: u8 = 0x03;
/// Fast Read, 8 dummy cycles
pub const FAST_READ: u8 = 0x0B;

// Program

/// Page Program
pub const PP: u8 = 0x02;

// Erase

/// Sector Erase (4 KiB)
pub const SE_20: u8 = 0x20;
/// Block Erase (32 KiB)
pub const BE_52: u8 = 0x52;
/// Block Erase (64 KiB)
pub const BE_D8: u8 = 0xD8;
/// Chip Erase (alternate opcode)
pub const CE_60: u8 = 0x60;
/// Chip Erase
pub const CE_C7: u8 = 0xC7;

// Reset

/// Enable Reset
pub const RSTEN: u8 = 0x66;
/// Reset Device
pub const RST: u8 = 0x99;

bitflags! {
    /// Status register 1 bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister1: u8 {
        /// Write/erase in progress
        const BUSY = 0x01;
        /// Write enable latch
        const WEL = 0x02;
        /// Block protect bit 0
        const BP0 = 0x04;
        /// Block protect bit 1
        const BP1 = 0x08;
        /// Block protect bit 2
        const BP2 = 0x10;
        /// Top/bottom protect
        const TB = 0x20;
        /// Sector/block protect
        const SEC = 0x40;
        /// Status register protect 0
        const SRP0 = 0x80;
    }
}

impl StatusRegister1 {
    /// Any block protection bit set
    pub fn is_protected(self) -> bool {
        self.intersects(Self::BP0 | Self::BP1 | Self::BP2)
    }
}
