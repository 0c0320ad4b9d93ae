//! Erase planning
//!
//! A request for `n` sectors is decomposed greedily into the largest erase
//! units the device offers: whole blocks first, then half blocks, then
//! single sectors. The result is an explicit [`ErasePlan`] of at most three
//! runs, which [`ErasePlan::execute`] replays against a [`FlashDriver`].
//!
//! For a 4 KiB sector device with 32 KiB half blocks and 64 KiB blocks,
//! 28 sectors become one block, one half block and four sectors, while 20
//! sectors skip the half block and become one block and four sectors:
//!
//! ```
//! use sfloader_core::erase::{EraseGeometry, EraseGranularity, ErasePlan};
//!
//! let geometry = EraseGeometry::new(0x1000, Some(0x8000), Some(0x1_0000));
//! let plan = ErasePlan::new(&geometry, 0, 28).unwrap();
//! assert_eq!(plan.count(EraseGranularity::Block), 1);
//! assert_eq!(plan.count(EraseGranularity::HalfBlock), 1);
//! assert_eq!(plan.count(EraseGranularity::Sector), 4);
//!
//! let plan = ErasePlan::new(&geometry, 0, 20).unwrap();
//! assert_eq!(plan.count(EraseGranularity::Block), 1);
//! assert_eq!(plan.count(EraseGranularity::HalfBlock), 0);
//! assert_eq!(plan.count(EraseGranularity::Sector), 4);
//! ```

use core::fmt;

use crate::driver::FlashDriver;
use crate::error::{Error, Result};

/// Erase unit sizes, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EraseGranularity {
    /// Base erase unit
    Sector,
    /// Aggregate of several sectors (32 KiB on most parts)
    HalfBlock,
    /// Aggregate of several half blocks (64 KiB on most parts)
    Block,
}

impl fmt::Display for EraseGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sector => "sector",
            Self::HalfBlock => "half-block",
            Self::Block => "block",
        })
    }
}

/// The erase units available on a device
///
/// Aggregate levels that are absent, not larger than a sector, or not an
/// integer multiple of the sector size are disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseGeometry {
    sector_size: u32,
    half_block_size: Option<u32>,
    block_size: Option<u32>,
}

impl EraseGeometry {
    /// Create a geometry from the sector size and optional aggregate sizes
    pub fn new(sector_size: u32, half_block_size: Option<u32>, block_size: Option<u32>) -> Self {
        let usable = |size: Option<u32>| {
            size.filter(|&s| sector_size != 0 && s > sector_size && s % sector_size == 0)
        };

        let geometry = Self {
            sector_size,
            half_block_size: usable(half_block_size),
            block_size: usable(block_size),
        };
        if geometry.half_block_size != half_block_size || geometry.block_size != block_size {
            log::debug!(
                "Disabled aggregate erase sizes {:?}/{:?} for 0x{:X} sectors",
                half_block_size,
                block_size,
                sector_size
            );
        }
        geometry
    }

    /// Geometry for `sector_size` sectors and whatever the driver supports
    pub fn for_driver<D: FlashDriver + ?Sized>(sector_size: u32, driver: &D) -> Self {
        Self::new(sector_size, driver.half_block_size(), driver.block_size())
    }

    /// Sector size in bytes
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Size in bytes of one unit of `granularity`, if that level is enabled
    pub fn unit_size(&self, granularity: EraseGranularity) -> Option<u32> {
        match granularity {
            EraseGranularity::Sector => Some(self.sector_size).filter(|&s| s != 0),
            EraseGranularity::HalfBlock => self.half_block_size,
            EraseGranularity::Block => self.block_size,
        }
    }

    /// Number of sectors in one unit of `granularity`
    pub fn sectors_per(&self, granularity: EraseGranularity) -> Option<u32> {
        self.unit_size(granularity).map(|size| size / self.sector_size)
    }
}

/// A sector range to erase, as the host describes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseRequest {
    /// Logical address of the first sector
    pub start_addr: u32,
    /// Index of the first sector
    pub start_sector: u32,
    /// Number of sectors
    pub sector_count: u32,
}

/// Consecutive erases at one granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseRun {
    /// Erase unit used
    pub granularity: EraseGranularity,
    /// Physical offset of the first unit
    pub offset: u32,
    /// Bytes per unit
    pub unit_size: u32,
    /// Number of units
    pub count: u32,
}

impl EraseRun {
    /// Bytes covered by the run
    pub fn byte_len(&self) -> u64 {
        self.unit_size as u64 * self.count as u64
    }

    /// Physical offset of every unit in the run
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.count as u64)
            .map(move |i| (self.offset as u64 + i * self.unit_size as u64) as u32)
    }
}

/// Ordered erase operations covering a contiguous sector range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasePlan {
    runs: heapless::Vec<EraseRun, 3>,
}

impl ErasePlan {
    /// Plan the erase of `sector_count` sectors starting at physical `offset`
    ///
    /// An aggregate level is only used while the running offset is aligned
    /// to its unit; otherwise its sectors fall through to the next finer
    /// level. Fails if the range does not fit the 32-bit address space or
    /// the geometry has no sector size.
    pub fn new(geometry: &EraseGeometry, offset: u32, sector_count: u32) -> Result<Self> {
        let mut runs = heapless::Vec::new();
        if sector_count == 0 {
            return Ok(Self { runs });
        }

        let sector_size = geometry
            .unit_size(EraseGranularity::Sector)
            .ok_or(Error::InvalidDescriptor)?;
        let end = offset as u64 + sector_count as u64 * sector_size as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(Error::AddressOutOfBounds);
        }

        let mut offset = offset;
        let mut remaining = sector_count;

        for granularity in [EraseGranularity::Block, EraseGranularity::HalfBlock] {
            let (Some(unit_size), Some(per_unit)) = (
                geometry.unit_size(granularity),
                geometry.sectors_per(granularity),
            ) else {
                continue;
            };

            let count = remaining / per_unit;
            if count == 0 {
                continue;
            }
            if offset % unit_size != 0 {
                log::debug!(
                    "Offset 0x{:08X} not {}-aligned, using smaller units",
                    offset,
                    granularity
                );
                continue;
            }

            push_run(&mut runs, granularity, offset, unit_size, count);
            // Only a range ending exactly at 4 GiB wraps, and then nothing is left
            offset = (offset as u64 + count as u64 * unit_size as u64) as u32;
            remaining -= count * per_unit;
        }

        if remaining > 0 {
            push_run(&mut runs, EraseGranularity::Sector, offset, sector_size, remaining);
        }

        Ok(Self { runs })
    }

    /// Runs in execution order
    pub fn runs(&self) -> &[EraseRun] {
        &self.runs
    }

    /// Number of units of `granularity` in the plan
    pub fn count(&self, granularity: EraseGranularity) -> u32 {
        self.runs
            .iter()
            .filter(|r| r.granularity == granularity)
            .map(|r| r.count)
            .sum()
    }

    /// Total number of erase commands
    pub fn op_count(&self) -> u32 {
        self.runs.iter().map(|r| r.count).sum()
    }

    /// Total bytes erased
    pub fn byte_len(&self) -> u64 {
        self.runs.iter().map(EraseRun::byte_len).sum()
    }

    /// Returns true if there is nothing to erase
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Every erase command as (granularity, physical offset), in order
    pub fn operations(&self) -> impl Iterator<Item = (EraseGranularity, u32)> + '_ {
        self.runs
            .iter()
            .flat_map(|run| run.offsets().map(move |offset| (run.granularity, offset)))
    }

    /// Issue the plan against a driver
    ///
    /// The first failing unit aborts the whole plan; its error is returned
    /// unchanged and nothing after it is attempted.
    pub fn execute<D: FlashDriver + ?Sized>(&self, driver: &mut D) -> Result<()> {
        for (granularity, offset) in self.operations() {
            log::trace!("Erasing {} at 0x{:08X}", granularity, offset);
            let result = match granularity {
                EraseGranularity::Sector => driver.erase_sector(offset),
                EraseGranularity::HalfBlock => driver.erase_half_block(offset),
                EraseGranularity::Block => driver.erase_block(offset),
            };
            if let Err(e) = result {
                log::error!("{} erase at 0x{:08X} failed: {}", granularity, offset, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

fn push_run(
    runs: &mut heapless::Vec<EraseRun, 3>,
    granularity: EraseGranularity,
    offset: u32,
    unit_size: u32,
    count: u32,
) {
    // At most one run per granularity, so the capacity is never exceeded
    let _ = runs.push(EraseRun {
        granularity,
        offset,
        unit_size,
        count,
    });
}
