//! Erase command implementation

use sfloader_core::erase::EraseRequest;
use sfloader_core::loader::PrepareFunction;

use super::spinner;
use crate::session::{Session, SessionError};

/// Build the request the host tool sends for `count` sectors at `addr`
pub fn sector_request(session: &Session, addr: u32, count: u32) -> Result<EraseRequest, SessionError> {
    let desc = session.descriptor();
    let sector_size = desc.sector_size();
    let len = count as u64 * sector_size as u64;
    let len32 = u32::try_from(len).map_err(|_| SessionError::OutOfRange { addr, len })?;
    let (start, _) = session.range(Some(addr), Some(len32))?;

    if sector_size == 0 || (start - desc.base_addr) % sector_size != 0 {
        return Err(SessionError::OutOfRange { addr: start, len });
    }

    Ok(EraseRequest {
        start_addr: start,
        start_sector: (start - desc.base_addr) / sector_size,
        sector_count: count,
    })
}

/// Erase `sectors` sectors starting at `addr`
pub fn run_erase(session: &Session, addr: u32, sectors: u32) -> Result<(), SessionError> {
    let request = sector_request(session, addr, sectors)?;
    let bytes = sectors as u64 * session.descriptor().sector_size() as u64;

    let pb = spinner(format!(
        "Erasing {} sectors ({} bytes) at 0x{:08X}...",
        sectors, bytes, addr
    ));
    let result = session.run(PrepareFunction::Erase, |loader| Ok(loader.erase(request)?));
    pb.finish_and_clear();
    result?;

    println!("Erased {} bytes starting at 0x{:08X}", bytes, addr);
    Ok(())
}

/// Erase the whole device
pub fn run_erase_chip(session: &Session) -> Result<(), SessionError> {
    let total = session.descriptor().total_size;

    let pb = spinner(format!(
        "Erasing {} bytes (this may take a while)...",
        total
    ));
    let result = session.run(PrepareFunction::Erase, |loader| Ok(loader.erase_chip()?));
    pb.finish_and_clear();
    result?;

    println!("Chip erase complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_sector_request() {
        let session = Session::open(None, Path::new("unused.bin"), true).unwrap();

        let request = sector_request(&session, 0x9001_0000, 20).unwrap();
        assert_eq!(
            request,
            EraseRequest {
                start_addr: 0x9001_0000,
                start_sector: 16,
                sector_count: 20,
            }
        );

        // Misaligned, beyond the end, below the base
        assert!(sector_request(&session, 0x9001_0800, 1).is_err());
        assert!(sector_request(&session, 0x907F_F000, 2).is_err());
        assert!(sector_request(&session, 0x0000_1000, 1).is_err());
    }
}
