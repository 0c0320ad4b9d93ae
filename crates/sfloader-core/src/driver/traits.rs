//! Driver trait definitions

use crate::erase::EraseGranularity;
use crate::error::{EraseFailure, Error, Result};
use crate::spi::SpiCommand;

/// SPI bus master
///
/// This trait represents the transport that can execute a single SPI
/// transaction against the flash. Implementations busy-wait; there is no
/// async variant because the loader is called synchronously by the host.
pub trait SpiMaster {
    /// Get the maximum number of bytes that can be read in a single transaction
    fn max_read_len(&self) -> usize;

    /// Get the maximum number of bytes that can be written in a single transaction
    fn max_write_len(&self) -> usize;

    /// Execute a single SPI command
    ///
    /// The command contains all the information needed for the transaction:
    /// - `opcode`: The SPI command opcode
    /// - `address`: Optional address (with width)
    /// - `dummy_cycles`: Number of dummy clock cycles after address
    /// - `write_data`: Data to write after the header
    /// - `read_buf`: Buffer to read data into
    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()>;

    /// Check if an opcode is supported by this master
    fn probe_opcode(&self, _opcode: u8) -> bool {
        true
    }

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<M: SpiMaster + ?Sized> SpiMaster for &mut M {
    fn max_read_len(&self) -> usize {
        (**self).max_read_len()
    }

    fn max_write_len(&self) -> usize {
        (**self).max_write_len()
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        (**self).execute(cmd)
    }

    fn probe_opcode(&self, opcode: u8) -> bool {
        (**self).probe_opcode(opcode)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Physical flash primitives
///
/// All offsets are physical, relative to the first byte of the flash.
/// Aggregate erase units are optional: a driver that reports `None` for a
/// size never sees the matching erase call from the planner.
pub trait FlashDriver {
    /// Identify the device
    ///
    /// The returned value is handed to the host unchanged, so it must be
    /// non-negative when interpreted as `i32`.
    fn identify(&mut self) -> Result<u32>;

    /// Read `buf.len()` bytes starting at `offset`
    fn read_buffer(&mut self, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Program `data` starting at `offset`
    ///
    /// The range may span several pages; splitting is up to the driver.
    fn write_buffer(&mut self, offset: u32, data: &[u8]) -> Result<()>;

    /// Erase the sector starting at `offset`
    fn erase_sector(&mut self, offset: u32) -> Result<()>;

    /// Erase the half block starting at `offset`
    fn erase_half_block(&mut self, _offset: u32) -> Result<()> {
        Err(Error::EraseError(EraseFailure::Unsupported {
            granularity: EraseGranularity::HalfBlock,
        }))
    }

    /// Erase the block starting at `offset`
    fn erase_block(&mut self, _offset: u32) -> Result<()> {
        Err(Error::EraseError(EraseFailure::Unsupported {
            granularity: EraseGranularity::Block,
        }))
    }

    /// Erase the whole device
    fn erase_chip(&mut self) -> Result<()>;

    /// Half block size in bytes, if the device supports half-block erase
    fn half_block_size(&self) -> Option<u32> {
        None
    }

    /// Block size in bytes, if the device supports block erase
    fn block_size(&self) -> Option<u32> {
        None
    }
}

/// Board bring-up and teardown around a loader session
pub trait Platform {
    /// Bring up clocks and the flash transport
    fn bring_up(&mut self) -> Result<()>;

    /// Quiesce the transport and anything that depends on it
    ///
    /// Teardown cannot fail from the host's point of view.
    fn quiesce(&mut self);
}

/// Platform with nothing to bring up, for hosted builds and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatform;

impl Platform for NoPlatform {
    fn bring_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn quiesce(&mut self) {}
}
