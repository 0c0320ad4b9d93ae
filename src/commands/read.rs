//! Read command implementation

use std::fs;
use std::path::Path;

use sfloader_core::loader::PrepareFunction;

use super::{byte_bar, CHUNK_SIZE};
use crate::session::{Loader, Session, SessionError};

/// Run the read command
pub fn run_read(
    session: &Session,
    output: &Path,
    addr: Option<u32>,
    length: Option<u32>,
) -> Result<(), SessionError> {
    let (start, len) = session.range(addr, length)?;

    let (_, data) = session.run(PrepareFunction::Verify, |loader| {
        read_with_progress(loader, start, len)
    })?;

    fs::write(output, &data).map_err(|e| SessionError::io(output, e))?;
    println!("Wrote {} bytes from 0x{:08X} to {:?}", data.len(), start, output);
    Ok(())
}

/// Read a range with a progress bar
pub fn read_with_progress(
    loader: &mut Loader<'_>,
    start: u32,
    len: u32,
) -> Result<Vec<u8>, SessionError> {
    let mut data = vec![0u8; len as usize];
    let pb = byte_bar(len as u64, "Reading");

    for (i, chunk) in data.chunks_mut(CHUNK_SIZE).enumerate() {
        loader.read(start + (i * CHUNK_SIZE) as u32, chunk)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Read complete");
    Ok(data)
}
