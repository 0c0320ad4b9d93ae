//! Serial NOR flash driver
//!
//! This module provides `SpiNorFlash`, which implements [`FlashDriver`]
//! for a JEDEC serial NOR part behind any [`SpiMaster`].

use crate::descriptor::DeviceDescriptor;
use crate::error::{EraseFailure, Error, Result};
use crate::protocol;
use crate::spi::{opcodes, AddressWidth};

use super::{FlashDriver, SpiMaster};

/// Status poll interval while programming a page
const PROGRAM_POLL_US: u32 = 10;

/// Status poll interval while erasing a sector or block
const ERASE_POLL_US: u32 = 10_000;

/// Geometry and timing of a serial NOR part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiNorConfig {
    /// Total size in bytes
    pub total_size: u32,
    /// Program page size in bytes
    pub page_size: u32,
    /// Sector (smallest erase unit) size in bytes
    pub sector_size: u32,
    /// Half block (0x52) size, if supported
    pub half_block_size: Option<u32>,
    /// Block (0xD8) size, if supported
    pub block_size: Option<u32>,
    /// Page program timeout in microseconds
    pub program_timeout_us: u32,
    /// Sector erase timeout in microseconds
    pub erase_timeout_us: u32,
}

impl SpiNorConfig {
    /// Derive the configuration from a device descriptor
    ///
    /// Assumes the usual 32 KiB / 64 KiB aggregate erase units; use
    /// [`with_block_sizes`](Self::with_block_sizes) for parts without them.
    pub fn from_descriptor(desc: &DeviceDescriptor) -> Self {
        Self {
            total_size: desc.total_size,
            page_size: desc.page_size,
            sector_size: desc.sector_size(),
            half_block_size: Some(32 * 1024),
            block_size: Some(64 * 1024),
            program_timeout_us: desc.timeout_prog.saturating_mul(1000),
            erase_timeout_us: desc.timeout_erase.saturating_mul(1000),
        }
    }

    /// Override the aggregate erase unit sizes
    pub fn with_block_sizes(mut self, half_block: Option<u32>, block: Option<u32>) -> Self {
        self.half_block_size = half_block;
        self.block_size = block;
        self
    }
}

/// Serial NOR flash behind a SPI master
///
/// # Example
///
/// ```ignore
/// use sfloader_core::descriptor::devices::W25Q64JV;
/// use sfloader_core::driver::{FlashDriver, SpiNorConfig, SpiNorFlash};
///
/// let mut flash = SpiNorFlash::new(master, SpiNorConfig::from_descriptor(&W25Q64JV));
/// let id = flash.identify()?;
/// ```
pub struct SpiNorFlash<M: SpiMaster> {
    master: M,
    config: SpiNorConfig,
}

impl<M: SpiMaster> SpiNorFlash<M> {
    /// Create a new driver
    pub fn new(master: M, config: SpiNorConfig) -> Self {
        if config.total_size > AddressWidth::ThreeByte.max_size() {
            log::warn!(
                "Flash size 0x{:X} exceeds 3-byte addressing, upper part unreachable",
                config.total_size
            );
        }
        Self { master, config }
    }

    /// Get a reference to the underlying SPI master
    pub fn master(&self) -> &M {
        &self.master
    }

    /// Get a mutable reference to the underlying SPI master
    pub fn master_mut(&mut self) -> &mut M {
        &mut self.master
    }

    /// Consume the driver and return the SPI master
    pub fn into_master(self) -> M {
        self.master
    }

    /// Get the configuration
    pub fn config(&self) -> &SpiNorConfig {
        &self.config
    }

    /// Send the software reset sequence
    pub fn reset(&mut self) -> Result<()> {
        protocol::software_reset(&mut self.master)
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        let end = (offset as u64) + (len as u64);
        if end > self.config.total_size as u64 {
            log::error!(
                "Range 0x{:08X}+0x{:X} beyond flash size 0x{:X}",
                offset,
                len,
                self.config.total_size
            );
            return Err(Error::AddressOutOfBounds);
        }
        Ok(())
    }

    fn erase_unit(&mut self, opcode: u8, offset: u32, size: u32, timeout_us: u32) -> Result<()> {
        self.check_range(offset, size as usize)?;
        if size == 0 || offset % size != 0 {
            log::error!("Erase at 0x{:08X} not aligned to 0x{:X}", offset, size);
            return Err(Error::EraseError(EraseFailure::CommandFailed { addr: offset }));
        }
        log::trace!("Erase 0x{:02X} at 0x{:08X}", opcode, offset);
        protocol::erase_unit(&mut self.master, opcode, offset, ERASE_POLL_US, timeout_us).map_err(
            |e| match e {
                Error::SpiTransferFailed => {
                    Error::EraseError(EraseFailure::CommandFailed { addr: offset })
                }
                other => other,
            },
        )
    }
}

impl<M: SpiMaster> FlashDriver for SpiNorFlash<M> {
    fn identify(&mut self) -> Result<u32> {
        let (manufacturer, device) = protocol::read_jedec_id(&mut self.master)?;

        if (manufacturer == 0x00 && device == 0x0000) || (manufacturer == 0xFF && device == 0xFFFF)
        {
            log::warn!(
                "No flash responded (JEDEC ID {:02X} {:04X})",
                manufacturer,
                device
            );
            return Err(Error::ChipNotFound);
        }

        log::info!("JEDEC ID: {:02X} {:04X}", manufacturer, device);
        Ok(((manufacturer as u32) << 16) | device as u32)
    }

    fn read_buffer(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        protocol::read(&mut self.master, offset, buf).map_err(|e| match e {
            Error::SpiTransferFailed => Error::ReadError,
            other => other,
        })
    }

    fn write_buffer(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;

        let page_size = self.config.page_size.max(1) as usize;
        // Some masters cannot carry a whole page in one transaction
        let max_write = self.master.max_write_len().max(1);

        let mut done = 0usize;
        while done < data.len() {
            let addr = offset + done as u32;
            let to_page_end = page_size - (addr as usize % page_size);
            let len = to_page_end.min(data.len() - done).min(max_write);

            protocol::program_page(
                &mut self.master,
                addr,
                &data[done..done + len],
                PROGRAM_POLL_US,
                self.config.program_timeout_us,
            )
            .map_err(|e| match e {
                Error::SpiTransferFailed => Error::WriteError,
                other => other,
            })?;

            done += len;
        }

        Ok(())
    }

    fn erase_sector(&mut self, offset: u32) -> Result<()> {
        let size = self.config.sector_size;
        let timeout = self.config.erase_timeout_us;
        self.erase_unit(opcodes::SE_20, offset, size, timeout)
    }

    fn erase_half_block(&mut self, offset: u32) -> Result<()> {
        match self.config.half_block_size {
            // 32 KiB erase takes up to 4x a sector erase
            Some(size) => {
                let timeout = self.config.erase_timeout_us.saturating_mul(4);
                self.erase_unit(opcodes::BE_52, offset, size, timeout)
            }
            None => Err(Error::EraseError(EraseFailure::Unsupported {
                granularity: crate::erase::EraseGranularity::HalfBlock,
            })),
        }
    }

    fn erase_block(&mut self, offset: u32) -> Result<()> {
        match self.config.block_size {
            // 64 KiB erase takes up to 5x a sector erase
            Some(size) => {
                let timeout = self.config.erase_timeout_us.saturating_mul(5);
                self.erase_unit(opcodes::BE_D8, offset, size, timeout)
            }
            None => Err(Error::EraseError(EraseFailure::Unsupported {
                granularity: crate::erase::EraseGranularity::Block,
            })),
        }
    }

    fn erase_chip(&mut self) -> Result<()> {
        log::debug!("Chip erase");
        protocol::chip_erase(&mut self.master).map_err(|e| match e {
            Error::SpiTransferFailed => Error::EraseError(EraseFailure::CommandFailed { addr: 0 }),
            other => other,
        })
    }

    // Only report units the master can actually issue
    fn half_block_size(&self) -> Option<u32> {
        self.config
            .half_block_size
            .filter(|_| self.master.probe_opcode(opcodes::BE_52))
    }

    fn block_size(&self) -> Option<u32> {
        self.config
            .block_size
            .filter(|_| self.master.probe_opcode(opcodes::BE_D8))
    }
}
