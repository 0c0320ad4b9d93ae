//! sfloader-dummy - In-memory serial NOR flash emulator
//!
//! This crate provides a SPI master that emulates a W25Q64JV-style serial
//! NOR flash in memory. It behaves like the real part where the loader can
//! tell: programming only moves bits away from the erased value and wraps
//! within a page, erases work
//! on aligned units, program and erase need the write enable latch and
//! keep the BUSY bit set for a few status polls. Faults can be injected to
//! exercise the loader's error paths, and every program, erase and read is
//! recorded.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use sfloader_core::error::{Error, Result};
use sfloader_core::driver::SpiMaster;
use sfloader_core::spi::{opcodes, SpiCommand, StatusRegister1};

/// Opcodes the emulated chip understands
const SUPPORTED_OPCODES: &[u8] = &[
    opcodes::RDID,
    opcodes::RDSR,
    opcodes::WREN,
    opcodes::WRDI,
    opcodes::READ,
    opcodes::FAST_READ,
    opcodes::PP,
    opcodes::SE_20,
    opcodes::BE_52,
    opcodes::BE_D8,
    opcodes::CE_60,
    opcodes::CE_C7,
    opcodes::RSTEN,
    opcodes::RST,
];

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Flash size in bytes
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
    /// Largest transaction the emulated bus accepts for reads
    pub max_read_len: usize,
    /// Status polls that report BUSY after each program or erase
    pub busy_polls: u32,
    /// Byte value of erased cells
    pub erased_value: u8,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4017,     // W25Q64JV
            size: 8 * 1024 * 1024,
            page_size: 256,
            max_read_len: 4096,
            busy_polls: 1,
            erased_value: 0xFF,
        }
    }
}

/// Injected misbehavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every transaction with this opcode fails on the bus
    FailOpcode(u8),
    /// The transaction with this opcode at this address fails on the bus
    FailAt {
        /// Opcode to fail
        opcode: u8,
        /// Address the command must carry
        addr: u32,
    },
    /// BUSY never clears after a program or erase
    StuckBusy,
    /// WREN is accepted but the latch never sets
    IgnoreWren,
}

/// A state-changing or reading command the emulator executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// Read of `len` bytes
    Read {
        /// Start address
        addr: u32,
        /// Byte count
        len: usize,
    },
    /// Page program of `len` bytes
    Program {
        /// Start address
        addr: u32,
        /// Byte count
        len: usize,
    },
    /// Sector or block erase
    Erase {
        /// Erase opcode
        opcode: u8,
        /// Aligned start address
        addr: u32,
        /// Erase unit size
        size: usize,
    },
    /// Whole chip erase
    ChipErase,
}

/// Dummy flash
///
/// Emulates a serial NOR flash chip in memory.
#[cfg(feature = "alloc")]
pub struct DummyFlash {
    config: DummyConfig,
    data: Vec<u8>,
    write_enabled: bool,
    busy_left: u32,
    faults: Vec<Fault>,
    ops: Vec<FlashOp>,
}

#[cfg(feature = "alloc")]
impl DummyFlash {
    /// Create a new, fully erased dummy flash with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![config.erased_value; config.size];
        Self {
            config,
            data,
            write_enabled: false,
            busy_left: 0,
            faults: Vec::new(),
            ops: Vec::new(),
        }
    }

    /// Create a new dummy flash with default configuration (W25Q64JV)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a dummy flash with pre-filled data
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the emulator and return the flash content
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Add a fault
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Remove all faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Commands executed so far
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Forget the recorded commands
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn check_faults(&self, cmd: &SpiCommand<'_>) -> Result<()> {
        let failed = self.faults.iter().any(|f| match *f {
            Fault::FailOpcode(op) => op == cmd.opcode,
            Fault::FailAt { opcode, addr } => opcode == cmd.opcode && cmd.address == Some(addr),
            _ => false,
        });
        if failed {
            log::debug!("Injected failure for opcode 0x{:02X}", cmd.opcode);
            return Err(Error::SpiTransferFailed);
        }
        Ok(())
    }

    fn status(&mut self) -> StatusRegister1 {
        let mut sr = StatusRegister1::empty();
        if self.write_enabled {
            sr |= StatusRegister1::WEL;
        }
        if self.has_fault(Fault::StuckBusy) && self.busy_left > 0 {
            sr |= StatusRegister1::BUSY;
        } else if self.busy_left > 0 {
            self.busy_left -= 1;
            sr |= StatusRegister1::BUSY;
        }
        sr
    }

    /// Start an internal operation; WEL clears when it completes
    fn start_busy(&mut self) {
        self.write_enabled = false;
        self.busy_left = self.config.busy_polls.max(1);
    }

    fn require_ready(&self) -> Result<()> {
        if self.busy_left > 0 {
            log::warn!("Command issued while busy");
            return Err(Error::SpiTransferFailed);
        }
        Ok(())
    }

    fn require_wel(&self) -> Result<()> {
        if !self.write_enabled {
            return Err(Error::WriteProtected);
        }
        Ok(())
    }

    fn handle_read(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        self.require_ready()?;
        let addr = cmd.address.unwrap_or(0) as usize;
        let len = cmd.read_buf.len();

        if len > self.config.max_read_len || addr + len > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }

        cmd.read_buf.copy_from_slice(&self.data[addr..addr + len]);
        self.ops.push(FlashOp::Read {
            addr: addr as u32,
            len,
        });
        Ok(())
    }

    fn handle_page_program(&mut self, cmd: &SpiCommand<'_>) -> Result<()> {
        self.require_ready()?;
        self.require_wel()?;

        let addr = cmd.address.unwrap_or(0) as usize;
        if addr >= self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }

        // The address counter wraps within the page
        let page_size = self.config.page_size;
        let page_base = addr - addr % page_size;
        for (i, &byte) in cmd.write_data.iter().enumerate() {
            let a = page_base + (addr - page_base + i) % page_size;
            // Programming can only move bits away from the erased state
            let erased = self.config.erased_value;
            self.data[a] = erased ^ ((self.data[a] ^ erased) | (byte ^ erased));
        }

        self.ops.push(FlashOp::Program {
            addr: addr as u32,
            len: cmd.write_data.len(),
        });
        self.start_busy();
        Ok(())
    }

    fn handle_erase(&mut self, cmd: &SpiCommand<'_>, erase_size: usize) -> Result<()> {
        self.require_ready()?;
        self.require_wel()?;

        let addr = cmd.address.unwrap_or(0) as usize;

        // The device ignores the low address bits
        let aligned_addr = addr & !(erase_size - 1);

        if aligned_addr + erase_size > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }

        self.data[aligned_addr..aligned_addr + erase_size].fill(self.config.erased_value);

        self.ops.push(FlashOp::Erase {
            opcode: cmd.opcode,
            addr: aligned_addr as u32,
            size: erase_size,
        });
        self.start_busy();
        Ok(())
    }

    fn handle_chip_erase(&mut self) -> Result<()> {
        self.require_ready()?;
        self.require_wel()?;

        self.data.fill(self.config.erased_value);

        self.ops.push(FlashOp::ChipErase);
        self.start_busy();
        Ok(())
    }
}

#[cfg(feature = "alloc")]
impl SpiMaster for DummyFlash {
    fn max_read_len(&self) -> usize {
        self.config.max_read_len
    }

    fn max_write_len(&self) -> usize {
        self.config.page_size
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        self.check_faults(cmd)?;

        match cmd.opcode {
            // JEDEC ID
            opcodes::RDID => {
                if cmd.read_buf.len() >= 3 {
                    cmd.read_buf[0] = self.config.manufacturer_id;
                    cmd.read_buf[1] = (self.config.device_id >> 8) as u8;
                    cmd.read_buf[2] = self.config.device_id as u8;
                }
                Ok(())
            }

            // Status register read
            opcodes::RDSR => {
                let sr = self.status();
                if let Some(b) = cmd.read_buf.first_mut() {
                    *b = sr.bits();
                }
                Ok(())
            }

            // Write enable/disable
            opcodes::WREN => {
                if !self.has_fault(Fault::IgnoreWren) {
                    self.write_enabled = true;
                }
                Ok(())
            }
            opcodes::WRDI => {
                self.write_enabled = false;
                Ok(())
            }

            // Read commands
            opcodes::READ | opcodes::FAST_READ => self.handle_read(cmd),

            // Page program
            opcodes::PP => self.handle_page_program(cmd),

            // Erase commands
            opcodes::SE_20 => self.handle_erase(cmd, 4 * 1024),
            opcodes::BE_52 => self.handle_erase(cmd, 32 * 1024),
            opcodes::BE_D8 => self.handle_erase(cmd, 64 * 1024),
            opcodes::CE_60 | opcodes::CE_C7 => self.handle_chip_erase(),

            // Software reset
            opcodes::RSTEN => Ok(()),
            opcodes::RST => {
                self.write_enabled = false;
                self.busy_left = 0;
                Ok(())
            }

            // Unknown opcode
            _ => Err(Error::OpcodeNotSupported),
        }
    }

    fn probe_opcode(&self, opcode: u8) -> bool {
        SUPPORTED_OPCODES.contains(&opcode)
    }

    fn delay_us(&mut self, _us: u32) {
        // No delay needed for in-memory operations
    }
}
