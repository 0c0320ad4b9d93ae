//! Program command implementation
//!
//! Programming follows the host tool: the sectors the file touches are read
//! back, blank-checked and erased where needed, then the merged content is
//! fed to the loader one page at a time. Bytes of partially covered sectors
//! survive the erase.

use std::fs;
use std::path::Path;

use sfloader_core::descriptor::DeviceDescriptor;
use sfloader_core::erase::EraseRequest;
use sfloader_core::loader::PrepareFunction;
use sfloader_core::scan::VerifyOutcome;

use super::byte_bar;
use super::read::read_with_progress;
use crate::session::{Loader, Session, SessionError};

/// Sectors covered by a programmed range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SectorSpan {
    /// Logical address of the first sector
    addr: u32,
    /// Index of the first sector
    index: u32,
    /// Number of sectors
    count: u32,
    sector_size: u32,
}

impl SectorSpan {
    fn new(desc: &DeviceDescriptor, addr: u32, len: u32) -> Self {
        let sector_size = desc.sector_size().max(1);
        let offset = addr - desc.base_addr;
        let first = offset / sector_size;
        let last = (offset + len.max(1) - 1) / sector_size;
        Self {
            addr: desc.base_addr + first * sector_size,
            index: first,
            count: last - first + 1,
            sector_size,
        }
    }

    fn len(&self) -> u32 {
        self.count * self.sector_size
    }

    fn sector_addr(&self, i: u32) -> u32 {
        self.addr + i * self.sector_size
    }
}

/// Contiguous runs of sectors marked for erase
fn erase_requests(span: &SectorSpan, dirty: &[bool]) -> Vec<EraseRequest> {
    let mut requests: Vec<EraseRequest> = Vec::new();
    for (i, &d) in dirty.iter().enumerate() {
        if !d {
            continue;
        }
        let i = i as u32;
        match requests.last_mut() {
            Some(last) if last.start_sector + last.sector_count == span.index + i => {
                last.sector_count += 1;
            }
            _ => requests.push(EraseRequest {
                start_addr: span.sector_addr(i),
                start_sector: span.index + i,
                sector_count: 1,
            }),
        }
    }
    requests
}

/// What a program pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStats {
    pub sectors_erased: u32,
    pub erase_requests: usize,
    pub pages_programmed: usize,
}

/// Program `data` at `start` inside an open session
pub fn program_image(
    loader: &mut Loader<'_>,
    start: u32,
    data: &[u8],
    force_erase: bool,
) -> Result<ProgramStats, SessionError> {
    let desc = *loader.descriptor();
    let span = SectorSpan::new(&desc, start, data.len() as u32);
    let mut stats = ProgramStats::default();

    let mut image = read_with_progress(loader, span.addr, span.len())?;
    let offset = (start - span.addr) as usize;
    image[offset..offset + data.len()].copy_from_slice(data);

    let dirty = if force_erase {
        vec![true; span.count as usize]
    } else {
        let mut dirty = Vec::with_capacity(span.count as usize);
        for i in 0..span.count {
            let blank =
                loader.check_blank(span.sector_addr(i), span.sector_size, desc.erased_value)?;
            dirty.push(!blank.is_blank());
        }
        dirty
    };

    for request in erase_requests(&span, &dirty) {
        log::debug!(
            "Erasing {} sectors at 0x{:08X}",
            request.sector_count,
            request.start_addr
        );
        loader.erase(request)?;
        stats.sectors_erased += request.sector_count;
        stats.erase_requests += 1;
    }

    let page_size = desc.page_size.max(1) as usize;
    let pb = byte_bar(image.len() as u64, "Writing");
    for (i, page) in image.chunks(page_size).enumerate() {
        if page.iter().any(|&b| b != desc.erased_value) {
            loader.program(span.addr + (i * page_size) as u32, page)?;
            stats.pages_programmed += 1;
        }
        pb.inc(page.len() as u64);
    }
    pb.finish_with_message("Write complete");

    Ok(stats)
}

/// Run the program command
pub fn run_program(
    session: &Session,
    input: &Path,
    addr: Option<u32>,
    force_erase: bool,
    verify: bool,
) -> Result<(), SessionError> {
    let data = fs::read(input).map_err(|e| SessionError::io(input, e))?;
    println!("Read {} bytes from {:?}", data.len(), input);

    if data.is_empty() {
        println!("Nothing to program");
        return Ok(());
    }

    let len = u32::try_from(data.len()).map_err(|_| SessionError::OutOfRange {
        addr: addr.unwrap_or(session.descriptor().base_addr),
        len: data.len() as u64,
    })?;
    let (start, _) = session.range(addr, Some(len))?;

    let (_, stats) = session.run(PrepareFunction::Program, |loader| {
        let stats = program_image(loader, start, &data, force_erase)?;
        if verify {
            match loader.verify(start, &data)? {
                VerifyOutcome::Match { .. } => println!("Verification passed!"),
                VerifyOutcome::Mismatch { addr } => return Err(SessionError::VerifyFailed(addr)),
            }
        }
        Ok(stats)
    })?;

    println!(
        "Erased {} sectors in {} requests, programmed {} pages at 0x{:08X}",
        stats.sectors_erased, stats.erase_requests, stats.pages_programmed, start
    );
    println!("Write complete!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfloader_core::descriptor::devices::W25Q64JV;
    use std::path::PathBuf;

    const BASE: u32 = 0x9000_0000;

    fn temp_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sfloader-program-{}-{}.bin",
            std::process::id(),
            name
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_sector_span() {
        let span = SectorSpan::new(&W25Q64JV, BASE + 0x1800, 0x1000);
        assert_eq!(
            span,
            SectorSpan {
                addr: BASE + 0x1000,
                index: 1,
                count: 2,
                sector_size: 0x1000,
            }
        );
        assert_eq!(span.len(), 0x2000);

        let span = SectorSpan::new(&W25Q64JV, BASE + 0x2000, 0x1000);
        assert_eq!((span.index, span.count), (2, 1));
    }

    #[test]
    fn test_erase_requests_group_runs() {
        let span = SectorSpan::new(&W25Q64JV, BASE + 0x10_000, 6 * 0x1000);
        let requests = erase_requests(&span, &[true, true, false, true, true, true]);
        assert_eq!(
            requests,
            [
                EraseRequest {
                    start_addr: BASE + 0x10_000,
                    start_sector: 16,
                    sector_count: 2,
                },
                EraseRequest {
                    start_addr: BASE + 0x13_000,
                    start_sector: 19,
                    sector_count: 3,
                },
            ]
        );
        assert!(erase_requests(&span, &[false; 6]).is_empty());
    }

    #[test]
    fn test_reprogram_keeps_neighbours() {
        let path = temp_image("neighbours");
        let session = Session::open(None, &path, false).unwrap();

        // Blank device: nothing to erase
        let (_, stats) = session
            .run(PrepareFunction::Program, |loader| {
                program_image(loader, BASE + 0x0F00, &[0xAA; 0x200], false)
            })
            .unwrap();
        assert_eq!(stats.sectors_erased, 0);
        assert_eq!(stats.pages_programmed, 2);

        // Rewriting part of a sector erases it and restores the rest
        let (_, stats) = session
            .run(PrepareFunction::Program, |loader| {
                program_image(loader, BASE + 0x1000, &[0x55; 0x10], false)
            })
            .unwrap();
        assert_eq!(stats.sectors_erased, 1);
        assert_eq!(stats.erase_requests, 1);

        let image = fs::read(&path).unwrap();
        assert!(image[0x0F00..0x1000].iter().all(|&b| b == 0xAA));
        assert!(image[0x1000..0x1010].iter().all(|&b| b == 0x55));
        assert!(image[0x1010..0x1100].iter().all(|&b| b == 0xAA));
        assert!(image[0x1100..0x2000].iter().all(|&b| b == 0xFF));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_force_erase() {
        let path = temp_image("force");
        let session = Session::open(None, &path, true).unwrap();
        let (_, stats) = session
            .run(PrepareFunction::Program, |loader| {
                let stats = program_image(loader, BASE, &[0x01; 0x2100], true)?;
                assert!(loader.verify(BASE, &[0x01; 0x2100]).unwrap().is_match());
                Ok(stats)
            })
            .unwrap();
        assert_eq!(stats.sectors_erased, 3);
        assert_eq!(stats.erase_requests, 1);
        assert_eq!(stats.pages_programmed, 0x21);
    }
}
