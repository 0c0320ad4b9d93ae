//! In-memory flash driver for unit tests

use std::cell::Cell;
use std::rc::Rc;
use std::vec;
use std::vec::Vec;

use crate::driver::{FlashDriver, Platform};
use crate::erase::EraseGranularity;
use crate::error::{EraseFailure, Error, Result};

/// Driver call recorded by [`RamFlash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Identify,
    Read(u32, usize),
    Write(u32, usize),
    Erase(EraseGranularity, u32),
    EraseChip,
}

/// NOR-like RAM store: programming ANDs, erasing sets to 0xFF
pub(crate) struct RamFlash {
    pub mem: Vec<u8>,
    pub sector_size: u32,
    pub half_block_size: Option<u32>,
    pub block_size: Option<u32>,
    pub id: Result<u32>,
    pub fail_erase_at: Option<u32>,
    pub fail_read_at: Option<u32>,
    pub fail_write: bool,
    pub ops: Vec<Op>,
}

impl RamFlash {
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            sector_size: 0x1000,
            half_block_size: Some(0x8000),
            block_size: Some(0x1_0000),
            id: Ok(0x00EF_4017),
            fail_erase_at: None,
            fail_read_at: None,
            fail_write: false,
            ops: Vec::new(),
        }
    }

    pub fn erases(&self) -> Vec<(EraseGranularity, u32)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Erase(g, offset) => Some((*g, *offset)),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<(u32, usize)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Read(offset, len) => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = offset as usize;
        let end = start + len;
        if end > self.mem.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(start..end)
    }

    fn erase(&mut self, granularity: EraseGranularity, offset: u32, size: u32) -> Result<()> {
        self.ops.push(Op::Erase(granularity, offset));
        if self.fail_erase_at == Some(offset) {
            return Err(Error::EraseError(EraseFailure::CommandFailed { addr: offset }));
        }
        let range = self.range(offset, size as usize)?;
        self.mem[range].fill(0xFF);
        Ok(())
    }
}

impl FlashDriver for RamFlash {
    fn identify(&mut self) -> Result<u32> {
        self.ops.push(Op::Identify);
        self.id
    }

    fn read_buffer(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.ops.push(Op::Read(offset, buf.len()));
        let range = self.range(offset, buf.len())?;
        if let Some(bad) = self.fail_read_at {
            if range.contains(&(bad as usize)) {
                return Err(Error::ReadError);
            }
        }
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn write_buffer(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.ops.push(Op::Write(offset, data.len()));
        if self.fail_write {
            return Err(Error::WriteError);
        }
        let range = self.range(offset, data.len())?;
        for (cell, &byte) in self.mem[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase_sector(&mut self, offset: u32) -> Result<()> {
        let size = self.sector_size;
        self.erase(EraseGranularity::Sector, offset, size)
    }

    fn erase_half_block(&mut self, offset: u32) -> Result<()> {
        let size = self.half_block_size.ok_or(Error::EraseError(EraseFailure::Unsupported {
            granularity: EraseGranularity::HalfBlock,
        }))?;
        self.erase(EraseGranularity::HalfBlock, offset, size)
    }

    fn erase_block(&mut self, offset: u32) -> Result<()> {
        let size = self.block_size.ok_or(Error::EraseError(EraseFailure::Unsupported {
            granularity: EraseGranularity::Block,
        }))?;
        self.erase(EraseGranularity::Block, offset, size)
    }

    fn erase_chip(&mut self) -> Result<()> {
        self.ops.push(Op::EraseChip);
        self.mem.fill(0xFF);
        Ok(())
    }

    fn half_block_size(&self) -> Option<u32> {
        self.half_block_size
    }

    fn block_size(&self) -> Option<u32> {
        self.block_size
    }
}

/// Platform that counts bring-up and quiesce calls
#[derive(Default)]
pub(crate) struct CountingPlatform {
    pub bring_ups: usize,
    pub quiesces: usize,
    pub fail_bring_up: bool,
    /// Quiesce counter that outlives the platform
    pub shared_quiesces: Option<Rc<Cell<usize>>>,
}

impl CountingPlatform {
    /// Platform whose quiesces are also counted in `counter`
    pub fn shared(counter: &Rc<Cell<usize>>) -> Self {
        Self {
            shared_quiesces: Some(Rc::clone(counter)),
            ..Self::default()
        }
    }
}

impl Platform for CountingPlatform {
    fn bring_up(&mut self) -> Result<()> {
        self.bring_ups += 1;
        if self.fail_bring_up {
            return Err(Error::SpiTransferFailed);
        }
        Ok(())
    }

    fn quiesce(&mut self) {
        self.quiesces += 1;
        if let Some(counter) = &self.shared_quiesces {
            counter.set(counter.get() + 1);
        }
    }
}
