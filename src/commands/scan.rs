//! Blank check, verify and CRC commands

use std::fs;
use std::path::Path;

use sfloader_core::loader::PrepareFunction;
use sfloader_core::scan::{BlankCheck, VerifyOutcome};

use super::spinner;
use crate::session::{Session, SessionError};

/// Seed and final XOR of the standard CRC-32
const CRC32_XOR: u32 = 0xFFFF_FFFF;

/// Run the blank-check command
pub fn run_blank_check(
    session: &Session,
    addr: Option<u32>,
    length: Option<u32>,
    value: Option<u8>,
) -> Result<(), SessionError> {
    let (start, len) = session.range(addr, length)?;
    let value = value.unwrap_or(session.descriptor().erased_value);

    let pb = spinner(format!("Checking {} bytes at 0x{:08X}...", len, start));
    let result = session.run(PrepareFunction::Verify, |loader| {
        Ok(loader.check_blank(start, len, value)?)
    });
    pb.finish_and_clear();

    match result? {
        (_, BlankCheck::Blank) => {
            println!("0x{:08X}+0x{:X} is blank (0x{:02X})", start, len, value);
            Ok(())
        }
        (_, BlankCheck::NotBlank { addr }) => Err(SessionError::NotBlank(addr)),
    }
}

/// Run the verify command
pub fn run_verify(session: &Session, input: &Path, addr: Option<u32>) -> Result<(), SessionError> {
    let expected = fs::read(input).map_err(|e| SessionError::io(input, e))?;
    println!("Read {} bytes from {:?}", expected.len(), input);

    let len = u32::try_from(expected.len()).map_err(|_| SessionError::OutOfRange {
        addr: addr.unwrap_or(session.descriptor().base_addr),
        len: expected.len() as u64,
    })?;
    let (start, _) = session.range(addr, Some(len))?;

    let pb = spinner(format!("Verifying {} bytes at 0x{:08X}...", len, start));
    let result = session.run(PrepareFunction::Verify, |loader| {
        Ok(loader.verify(start, &expected)?)
    });
    pb.finish_and_clear();

    match result? {
        (_, VerifyOutcome::Match { end }) => {
            println!("Verification passed! (0x{:08X}..0x{:08X})", start, end);
            Ok(())
        }
        (_, VerifyOutcome::Mismatch { addr }) => Err(SessionError::VerifyFailed(addr)),
    }
}

/// Run the CRC command
pub fn run_crc(
    session: &Session,
    addr: Option<u32>,
    length: Option<u32>,
    polynomial: u32,
) -> Result<(), SessionError> {
    let (start, len) = session.range(addr, length)?;

    let (_, crc) = session.run(PrepareFunction::Verify, |loader| {
        Ok(loader.calc_crc(CRC32_XOR, start, len, polynomial)? ^ CRC32_XOR)
    })?;

    println!("CRC 0x{:08X} over 0x{:08X}+0x{:X}", crc, start, len);
    Ok(())
}
