//! Info and descriptor commands

use std::fs;
use std::path::Path;

use sfloader_core::abi::MAX_BLOCKSIZE_ERASE;
use sfloader_core::loader::PrepareFunction;

use super::format_size;
use crate::session::{Session, SessionError};

/// Prepare the loader and print what it reports about the device
pub fn run_info(session: &Session) -> Result<(), SessionError> {
    let (id, ()) = session.run(PrepareFunction::Verify, |_| Ok(()))?;
    let desc = session.descriptor();

    println!("Flash Device Information");
    println!("========================");
    println!();
    println!("Name:            {}", desc.name_str());
    println!(
        "JEDEC ID:        {:02X} {:04X}",
        (id >> 16) & 0xFF,
        id & 0xFFFF
    );
    println!(
        "Address range:   0x{:08X} - 0x{:08X}",
        desc.base_addr,
        desc.end_addr().wrapping_sub(1)
    );
    println!(
        "Size:            {} ({} bytes)",
        format_size(desc.total_size),
        desc.total_size
    );
    println!("Page size:       {} bytes", desc.page_size);
    println!("Erased value:    0x{:02X}", desc.erased_value);
    println!(
        "Timeouts:        program {} ms, erase {} ms",
        desc.timeout_prog, desc.timeout_erase
    );
    println!("Max erase block: {}", format_size(MAX_BLOCKSIZE_ERASE));
    println!();
    println!("Sectors:         {}", desc.sector_count());
    for region in desc.regions() {
        println!(
            "  {} sectors from offset 0x{:08X}",
            format_size(region.size),
            region.start
        );
    }

    Ok(())
}

/// Write the raw descriptor record
pub fn run_descriptor(session: &Session, output: &Path) -> Result<(), SessionError> {
    let desc = session.descriptor();
    let raw = desc.as_raw();
    fs::write(output, raw).map_err(|e| SessionError::io(output, e))?;

    println!(
        "Wrote {} byte descriptor for '{}' to {:?}",
        raw.len(),
        desc.name_str(),
        output
    );
    Ok(())
}
