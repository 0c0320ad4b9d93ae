//! SPI25 protocol implementation
//!
//! This module implements the common SPI flash command sequences
//! as defined by JEDEC, single I/O with 3-byte addressing.

use crate::driver::SpiMaster;
use crate::error::{Error, Result};
use crate::spi::{opcodes, SpiCommand, StatusRegister1};

/// Read the JEDEC ID from a flash chip
///
/// Returns (manufacturer_id, device_id) on success.
pub fn read_jedec_id<M: SpiMaster + ?Sized>(master: &mut M) -> Result<(u8, u16)> {
    let mut buf = [0u8; 3];
    let mut cmd = SpiCommand::read_reg(opcodes::RDID, &mut buf);
    master.execute(&mut cmd)?;

    let manufacturer = buf[0];
    let device = ((buf[1] as u16) << 8) | (buf[2] as u16);

    Ok((manufacturer, device))
}

/// Read the status register 1
pub fn read_status1<M: SpiMaster + ?Sized>(master: &mut M) -> Result<StatusRegister1> {
    let mut buf = [0u8; 1];
    let mut cmd = SpiCommand::read_reg(opcodes::RDSR, &mut buf);
    master.execute(&mut cmd)?;
    Ok(StatusRegister1::from_bits_retain(buf[0]))
}

/// Send the Write Enable command and check that the latch is set
pub fn write_enable<M: SpiMaster + ?Sized>(master: &mut M) -> Result<()> {
    let mut cmd = SpiCommand::simple(opcodes::WREN);
    master.execute(&mut cmd)?;

    let status = read_status1(master)?;
    if !status.contains(StatusRegister1::WEL) {
        log::error!("WEL not set after WREN (status 0x{:02X})", status.bits());
        if status.is_protected() {
            log::error!("Status register protection bits are set");
        }
        return Err(Error::WriteProtected);
    }
    Ok(())
}

/// Wait for the BUSY bit to clear
///
/// Polls the status register every `poll_delay_us` until BUSY clears or
/// `timeout_us` has elapsed, at which point [`Error::Timeout`] is returned.
pub fn wait_ready<M: SpiMaster + ?Sized>(
    master: &mut M,
    poll_delay_us: u32,
    timeout_us: u32,
) -> Result<()> {
    let max_polls = if poll_delay_us > 0 {
        (timeout_us / poll_delay_us).max(1)
    } else {
        timeout_us.max(1)
    };

    for _ in 0..max_polls {
        if !read_status1(master)?.contains(StatusRegister1::BUSY) {
            return Ok(());
        }
        if poll_delay_us > 0 {
            master.delay_us(poll_delay_us);
        }
    }

    log::error!("Device still busy after {} us", timeout_us);
    Err(Error::Timeout)
}

/// Read data from flash, split into transactions the master can handle
pub fn read<M: SpiMaster + ?Sized>(master: &mut M, addr: u32, buf: &mut [u8]) -> Result<()> {
    let max_len = master.max_read_len().max(1);

    for (i, chunk) in buf.chunks_mut(max_len).enumerate() {
        let chunk_addr = addr + (i * max_len) as u32;
        let mut cmd = SpiCommand::read_3b(opcodes::READ, chunk_addr, chunk);
        master.execute(&mut cmd)?;
    }

    Ok(())
}

/// Program a single page (up to page_size bytes)
///
/// The data must not cross a page boundary; the device wraps within the
/// page if it does.
pub fn program_page<M: SpiMaster + ?Sized>(
    master: &mut M,
    addr: u32,
    data: &[u8],
    poll_delay_us: u32,
    timeout_us: u32,
) -> Result<()> {
    write_enable(master)?;

    let mut cmd = SpiCommand::write_3b(opcodes::PP, addr, data);
    master.execute(&mut cmd)?;

    wait_ready(master, poll_delay_us, timeout_us)
}

/// Erase the sector or block containing `addr` using `opcode`
pub fn erase_unit<M: SpiMaster + ?Sized>(
    master: &mut M,
    opcode: u8,
    addr: u32,
    poll_delay_us: u32,
    timeout_us: u32,
) -> Result<()> {
    write_enable(master)?;

    let mut cmd = SpiCommand::erase_3b(opcode, addr);
    master.execute(&mut cmd)?;

    wait_ready(master, poll_delay_us, timeout_us)
}

/// Erase the entire chip
///
/// Chip erase typically takes 20-100s. We poll every 1s with a 200s timeout.
pub fn chip_erase<M: SpiMaster + ?Sized>(master: &mut M) -> Result<()> {
    write_enable(master)?;

    let mut cmd = SpiCommand::simple(opcodes::CE_C7);
    master.execute(&mut cmd)?;

    wait_ready(master, 1_000_000, 200_000_000)
}

/// Send software reset sequence
pub fn software_reset<M: SpiMaster + ?Sized>(master: &mut M) -> Result<()> {
    let mut cmd = SpiCommand::simple(opcodes::RSTEN);
    master.execute(&mut cmd)?;
    master.delay_us(50);
    let mut cmd = SpiCommand::simple(opcodes::RST);
    master.execute(&mut cmd)?;
    master.delay_us(100);
    Ok(())
}
